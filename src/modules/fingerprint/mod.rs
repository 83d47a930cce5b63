//! Spoofed client identity generation.
//!
//! One [`FingerprintProfile`] bundles every signal the target can observe:
//! TLS handshake shape, header set, screen geometry, timezone/locale pair,
//! hardware capabilities, and media descriptors. Each signal category is
//! produced by its own sub-generator keyed off the device class, then the
//! combination is validated as a unit by [`is_consistent`]; contradictory
//! draws are regenerated silently.

use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Device class constrains every other signal in the profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceClass {
    Desktop,
    Mobile,
    Tablet,
}

/// Browser engine family, shared between the TLS shape and the header set so
/// the two can be cross-checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BrowserFamily {
    Chrome,
    Firefox,
    Safari,
}

/// Relative weights used when the caller does not pin a device class.
#[derive(Debug, Clone, Copy)]
pub struct DeviceMix {
    pub desktop: f64,
    pub mobile: f64,
    pub tablet: f64,
}

impl Default for DeviceMix {
    fn default() -> Self {
        Self {
            desktop: 0.70,
            mobile: 0.25,
            tablet: 0.05,
        }
    }
}

impl DeviceMix {
    fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> DeviceClass {
        let total = (self.desktop + self.mobile + self.tablet).max(f64::EPSILON);
        let roll = rng.gen_range(0.0..total);
        if roll < self.desktop {
            DeviceClass::Desktop
        } else if roll < self.desktop + self.mobile {
            DeviceClass::Mobile
        } else {
            DeviceClass::Tablet
        }
    }
}

/// TLS handshake shape presented during negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsShape {
    pub id: String,
    pub family: BrowserFamily,
    pub ja3: String,
    pub alpn: Vec<String>,
    pub extensions: Vec<u16>,
}

/// Header signals tied to the browser family and device class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderSignals {
    pub family: BrowserFamily,
    pub user_agent: String,
    pub accept_language: String,
    pub platform: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSignals {
    pub screen: (u32, u32),
    pub viewport: (u32, u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalitySignals {
    pub timezone: String,
    pub locale: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareSignals {
    pub concurrency: u8,
    pub device_memory_gb: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaSignals {
    pub canvas_hash: String,
    pub audio_hash: String,
    pub webgl_vendor: String,
    pub webgl_renderer: String,
}

/// One coherent spoofed identity, immutable for its session's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintProfile {
    pub device_class: DeviceClass,
    pub tls: TlsShape,
    pub headers: HeaderSignals,
    pub screen: ScreenSignals,
    pub locality: LocalitySignals,
    pub hardware: HardwareSignals,
    pub media: MediaSignals,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Error)]
pub enum FingerprintError {
    /// Sub-generators kept contradicting each other past the regeneration
    /// budget. Indicates a broken custom generator, not a runtime condition.
    #[error("could not produce a consistent profile after {0} attempts")]
    Inconsistent(usize),
}

/// Sub-generator set, one function per signal category. Replacing a single
/// entry swaps out one signal's behaviour without touching the rest.
pub struct SubGenerators {
    pub tls: fn(&mut StdRng, DeviceClass, BrowserFamily) -> TlsShape,
    pub headers: fn(&mut StdRng, DeviceClass, BrowserFamily, &LocalitySignals) -> HeaderSignals,
    pub screen: fn(&mut StdRng, DeviceClass) -> ScreenSignals,
    pub locality: fn(&mut StdRng, DeviceClass) -> LocalitySignals,
    pub hardware: fn(&mut StdRng, DeviceClass) -> HardwareSignals,
    pub media: fn(&mut StdRng, DeviceClass) -> MediaSignals,
}

impl Default for SubGenerators {
    fn default() -> Self {
        Self {
            tls: generate_tls,
            headers: generate_headers,
            screen: generate_screen,
            locality: generate_locality,
            hardware: generate_hardware,
            media: generate_media,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub device_mix: DeviceMix,
    /// Regeneration budget for inconsistent draws.
    pub max_regenerations: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            device_mix: DeviceMix::default(),
            max_regenerations: 8,
        }
    }
}

/// Produces validated fingerprint profiles.
pub struct ProfileProvider {
    config: ProviderConfig,
    generators: SubGenerators,
}

impl ProfileProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            generators: SubGenerators::default(),
        }
    }

    pub fn with_generators(mut self, generators: SubGenerators) -> Self {
        self.generators = generators;
        self
    }

    /// Generate one internally-consistent profile. With no pinned class the
    /// device mix distribution decides.
    pub fn generate(
        &self,
        device_class: Option<DeviceClass>,
    ) -> Result<FingerprintProfile, FingerprintError> {
        let mut rng = StdRng::from_entropy();
        self.generate_with_rng(device_class, &mut rng)
    }

    /// Deterministic variant used by tests and session restoration checks.
    pub fn generate_with_rng(
        &self,
        device_class: Option<DeviceClass>,
        rng: &mut StdRng,
    ) -> Result<FingerprintProfile, FingerprintError> {
        for attempt in 0..self.config.max_regenerations {
            let class = device_class.unwrap_or_else(|| self.config.device_mix.draw(rng));
            let family = draw_family(rng, class);

            let locality = (self.generators.locality)(rng, class);
            let profile = FingerprintProfile {
                device_class: class,
                tls: (self.generators.tls)(rng, class, family),
                headers: (self.generators.headers)(rng, class, family, &locality),
                screen: (self.generators.screen)(rng, class),
                locality,
                hardware: (self.generators.hardware)(rng, class),
                media: (self.generators.media)(rng, class),
                created_at: chrono::Utc::now(),
            };

            if is_consistent(&profile) {
                return Ok(profile);
            }
            log::debug!(
                "discarded inconsistent profile draw (attempt {})",
                attempt + 1
            );
        }

        Err(FingerprintError::Inconsistent(self.config.max_regenerations))
    }
}

impl Default for ProfileProvider {
    fn default() -> Self {
        Self::new(ProviderConfig::default())
    }
}

/// Validate the joint combination of signals. Each rule encodes one way the
/// target could cross-check spoofed values against each other.
pub fn is_consistent(profile: &FingerprintProfile) -> bool {
    // TLS shape and header set must come from the same browser family.
    if profile.tls.family != profile.headers.family {
        return false;
    }

    // Safari only ships on Apple hardware; no Safari on generic desktops
    // claiming Windows platforms.
    if profile.headers.family == BrowserFamily::Safari
        && !matches!(profile.headers.platform.as_str(), "MacIntel" | "iPhone" | "iPad")
    {
        return false;
    }

    // Hardware ranges per device class.
    let hw = profile.hardware;
    let hw_ok = match profile.device_class {
        DeviceClass::Desktop => {
            (4..=32).contains(&hw.concurrency) && (8..=64).contains(&hw.device_memory_gb)
        }
        DeviceClass::Mobile => {
            (4..=8).contains(&hw.concurrency) && (2..=8).contains(&hw.device_memory_gb)
        }
        DeviceClass::Tablet => {
            (4..=8).contains(&hw.concurrency) && (3..=8).contains(&hw.device_memory_gb)
        }
    };
    if !hw_ok {
        return false;
    }

    // Viewport never exceeds the physical screen.
    let (sw, sh) = profile.screen.screen;
    let (vw, vh) = profile.screen.viewport;
    if vw > sw || vh > sh {
        return false;
    }

    // Phones report portrait geometry, desktops landscape.
    match profile.device_class {
        DeviceClass::Mobile if sw >= sh => return false,
        DeviceClass::Desktop if sw < sh => return false,
        _ => {}
    }

    // Timezone and locale must be a known plausible pairing, and the
    // accept-language header must lead with the locale's language.
    let pairing_known = TIMEZONE_LOCALES.iter().any(|(tz, locales)| {
        *tz == profile.locality.timezone
            && locales.contains(&profile.locality.locale.as_str())
    });
    if !pairing_known {
        return false;
    }
    let lang = profile.locality.locale.split('-').next().unwrap_or("");
    if !profile.headers.accept_language.starts_with(lang) {
        return false;
    }

    // Mobile user agents must say so.
    let ua_mobile = profile.headers.user_agent.contains("Mobile")
        || profile.headers.user_agent.contains("iPhone");
    match profile.device_class {
        DeviceClass::Mobile if !ua_mobile => return false,
        DeviceClass::Desktop if ua_mobile => return false,
        _ => {}
    }

    true
}

fn draw_family<R: Rng + ?Sized>(rng: &mut R, class: DeviceClass) -> BrowserFamily {
    let choices: &[BrowserFamily] = match class {
        DeviceClass::Desktop => &[
            BrowserFamily::Chrome,
            BrowserFamily::Chrome,
            BrowserFamily::Firefox,
            BrowserFamily::Safari,
        ],
        DeviceClass::Mobile | DeviceClass::Tablet => {
            &[BrowserFamily::Chrome, BrowserFamily::Safari]
        }
    };
    *choices.choose(rng).unwrap_or(&BrowserFamily::Chrome)
}

/// Plausible timezone/locale pairings used by both the generator and the
/// validator.
static TIMEZONE_LOCALES: Lazy<Vec<(&'static str, Vec<&'static str>)>> = Lazy::new(|| {
    vec![
        ("America/New_York", vec!["en-US"]),
        ("America/Chicago", vec!["en-US", "es-US"]),
        ("America/Los_Angeles", vec!["en-US"]),
        ("Europe/London", vec!["en-GB"]),
        ("Europe/Berlin", vec!["de-DE"]),
        ("Europe/Madrid", vec!["es-ES"]),
        ("Europe/Paris", vec!["fr-FR"]),
        ("Asia/Tokyo", vec!["ja-JP"]),
        ("Australia/Sydney", vec!["en-AU"]),
    ]
});

fn generate_locality(rng: &mut StdRng, _class: DeviceClass) -> LocalitySignals {
    let (timezone, locales) = TIMEZONE_LOCALES
        .choose(rng)
        .expect("timezone table is non-empty");
    let locale = locales.choose(rng).copied().unwrap_or("en-US");
    LocalitySignals {
        timezone: (*timezone).to_string(),
        locale: locale.to_string(),
    }
}

fn generate_tls(rng: &mut StdRng, _class: DeviceClass, family: BrowserFamily) -> TlsShape {
    // One shape per family; the grease slot varies per draw like real
    // Chrome handshakes do.
    let grease = [0x0a0a_u16, 0x1a1a, 0x2a2a, 0x3a3a]
        .choose(rng)
        .copied()
        .unwrap_or(0x0a0a);
    match family {
        BrowserFamily::Chrome => TlsShape {
            id: "chrome-120".into(),
            family,
            ja3: "771,4865-4866-4867-49195-49199-52393,0-23-65281-10-11-35-16-5-13-18-51-45-43-27,29-23-24,0".into(),
            alpn: vec!["h2".into(), "http/1.1".into()],
            extensions: vec![grease, 0, 23, 65281, 10, 11, 35, 16, 5, 13, 18, 51, 45, 43, 27],
        },
        BrowserFamily::Firefox => TlsShape {
            id: "firefox-121".into(),
            family,
            ja3: "771,4865-4867-4866-49195-49199-52393-52392,0-23-65281-10-11-35-16-5-34-51-43-13-45-28,29-23-24-25-256-257,0".into(),
            alpn: vec!["h2".into(), "http/1.1".into()],
            extensions: vec![0, 23, 65281, 10, 11, 35, 16, 5, 34, 51, 43, 13, 45, 28],
        },
        BrowserFamily::Safari => TlsShape {
            id: "safari-17".into(),
            family,
            ja3: "771,4865-4866-4867-49196-49195-52393-49200,0-23-65281-10-11-16-5-13-18-51-45-43-27,29-23-24-25,0".into(),
            alpn: vec!["h2".into(), "http/1.1".into()],
            extensions: vec![grease, 0, 23, 65281, 10, 11, 16, 5, 13, 18, 51, 45, 43, 27],
        },
    }
}

fn generate_headers(
    rng: &mut StdRng,
    class: DeviceClass,
    family: BrowserFamily,
    locality: &LocalitySignals,
) -> HeaderSignals {
    let lang = locality.locale.clone();
    let short = lang.split('-').next().unwrap_or("en").to_string();
    let quality = *[0.9_f32, 0.8, 0.7].choose(rng).unwrap_or(&0.9);
    let accept_language = format!("{lang},{short};q={quality:.1}");

    let (user_agent, platform) = match (family, class) {
        (BrowserFamily::Chrome, DeviceClass::Desktop) => (
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            "Win32".to_string(),
        ),
        (BrowserFamily::Chrome, DeviceClass::Mobile) => (
            "Mozilla/5.0 (Linux; Android 13; Pixel 7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36".to_string(),
            "Linux armv8l".to_string(),
        ),
        (BrowserFamily::Chrome, DeviceClass::Tablet) => (
            "Mozilla/5.0 (Linux; Android 13; SM-X710) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            "Linux armv8l".to_string(),
        ),
        (BrowserFamily::Firefox, _) => (
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0".to_string(),
            "Win32".to_string(),
        ),
        (BrowserFamily::Safari, DeviceClass::Desktop) => (
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_2) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15".to_string(),
            "MacIntel".to_string(),
        ),
        (BrowserFamily::Safari, DeviceClass::Mobile) => (
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Mobile/15E148 Safari/604.1".to_string(),
            "iPhone".to_string(),
        ),
        (BrowserFamily::Safari, DeviceClass::Tablet) => (
            "Mozilla/5.0 (iPad; CPU OS 17_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Mobile/15E148 Safari/604.1".to_string(),
            "iPad".to_string(),
        ),
    };

    HeaderSignals {
        family,
        user_agent,
        accept_language,
        platform,
    }
}

fn generate_screen(rng: &mut StdRng, class: DeviceClass) -> ScreenSignals {
    let (screens, chrome_height): (&[(u32, u32)], u32) = match class {
        DeviceClass::Desktop => (
            &[(1920, 1080), (2560, 1440), (1680, 1050), (3440, 1440)],
            120,
        ),
        DeviceClass::Mobile => (&[(1080, 2400), (1170, 2532), (1440, 3120)], 140),
        DeviceClass::Tablet => (&[(1620, 2160), (2048, 2732), (1600, 2560)], 100),
    };
    let screen = *screens.choose(rng).unwrap_or(&screens[0]);
    let viewport = (
        screen.0,
        screen.1.saturating_sub(chrome_height + rng.gen_range(0..40)),
    );
    ScreenSignals { screen, viewport }
}

fn generate_hardware(rng: &mut StdRng, class: DeviceClass) -> HardwareSignals {
    let (concurrency_choices, memory_choices): (&[u8], &[u8]) = match class {
        DeviceClass::Desktop => (&[4, 8, 12, 16, 24], &[8, 16, 32]),
        DeviceClass::Mobile => (&[4, 6, 8], &[4, 6, 8]),
        DeviceClass::Tablet => (&[4, 6, 8], &[4, 6, 8]),
    };
    HardwareSignals {
        concurrency: *concurrency_choices.choose(rng).unwrap_or(&4),
        device_memory_gb: *memory_choices.choose(rng).unwrap_or(&4),
    }
}

fn generate_media(rng: &mut StdRng, class: DeviceClass) -> MediaSignals {
    let (vendors, renderers): (&[&str], &[&str]) = match class {
        DeviceClass::Desktop => (
            &["Google Inc. (NVIDIA)", "Google Inc. (AMD)", "Google Inc. (Intel)"],
            &[
                "ANGLE (NVIDIA GeForce RTX 3060)",
                "ANGLE (AMD Radeon RX 6700)",
                "ANGLE (Intel(R) UHD Graphics 770)",
            ],
        ),
        DeviceClass::Mobile | DeviceClass::Tablet => (
            &["Qualcomm", "ARM", "Apple"],
            &["Adreno (TM) 740", "Mali-G715", "Apple A17 GPU"],
        ),
    };
    let canvas_seed: u64 = rng.r#gen();
    let audio_seed: u64 = rng.r#gen();
    MediaSignals {
        canvas_hash: format!("{canvas_seed:016x}"),
        audio_hash: format!("{audio_seed:016x}"),
        webgl_vendor: vendors.choose(rng).copied().unwrap_or("Google Inc.").into(),
        webgl_renderer: renderers
            .choose(rng)
            .copied()
            .unwrap_or("ANGLE (Generic)")
            .into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_generated_profile_is_consistent() {
        let provider = ProfileProvider::default();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let profile = provider.generate_with_rng(None, &mut rng).unwrap();
            assert!(is_consistent(&profile), "inconsistent draw: {profile:#?}");
        }
    }

    #[test]
    fn pinned_device_class_is_respected() {
        let provider = ProfileProvider::default();
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..50 {
            let profile = provider
                .generate_with_rng(Some(DeviceClass::Mobile), &mut rng)
                .unwrap();
            assert_eq!(profile.device_class, DeviceClass::Mobile);
        }
    }

    #[test]
    fn validator_rejects_cross_family_mixups() {
        let provider = ProfileProvider::default();
        let mut rng = StdRng::seed_from_u64(3);
        let mut profile = provider
            .generate_with_rng(Some(DeviceClass::Desktop), &mut rng)
            .unwrap();
        profile.tls.family = match profile.headers.family {
            BrowserFamily::Chrome => BrowserFamily::Firefox,
            _ => BrowserFamily::Chrome,
        };
        assert!(!is_consistent(&profile));
    }

    #[test]
    fn validator_rejects_high_memory_mobile() {
        let provider = ProfileProvider::default();
        let mut rng = StdRng::seed_from_u64(5);
        let mut profile = provider
            .generate_with_rng(Some(DeviceClass::Mobile), &mut rng)
            .unwrap();
        profile.hardware.device_memory_gb = 64;
        assert!(!is_consistent(&profile));
    }

    #[test]
    fn validator_rejects_mismatched_timezone_locale() {
        let provider = ProfileProvider::default();
        let mut rng = StdRng::seed_from_u64(9);
        let mut profile = provider
            .generate_with_rng(Some(DeviceClass::Desktop), &mut rng)
            .unwrap();
        profile.locality.timezone = "Asia/Tokyo".into();
        profile.locality.locale = "de-DE".into();
        assert!(!is_consistent(&profile));
    }

    #[test]
    fn validator_rejects_viewport_larger_than_screen() {
        let provider = ProfileProvider::default();
        let mut rng = StdRng::seed_from_u64(13);
        let mut profile = provider
            .generate_with_rng(Some(DeviceClass::Desktop), &mut rng)
            .unwrap();
        profile.screen.viewport = (profile.screen.screen.0 + 100, profile.screen.screen.1);
        assert!(!is_consistent(&profile));
    }

    #[test]
    fn device_mix_draws_all_classes() {
        let mix = DeviceMix::default();
        let mut rng = StdRng::seed_from_u64(21);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            seen.insert(mix.draw(&mut rng));
        }
        assert!(seen.contains(&DeviceClass::Desktop));
        assert!(seen.contains(&DeviceClass::Mobile));
    }
}
