//! Browser fingerprint generation.
//!
//! Produces randomized but internally-consistent browsing identities for
//! the rendered-browser tier: the platform string always matches the OS
//! family of the chosen user agent, and languages always match the locale.
//! Generated hashes are tracked for the process lifetime so the same
//! identity is not reused within one run.

use std::collections::HashSet;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// User agent families, each tied to one OS platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UaFamily {
    ChromeWindows,
    ChromeMac,
    FirefoxWindows,
    SafariMac,
}

impl UaFamily {
    const ALL: &'static [UaFamily] = &[
        UaFamily::ChromeWindows,
        UaFamily::ChromeMac,
        UaFamily::FirefoxWindows,
        UaFamily::SafariMac,
    ];

    fn user_agents(&self) -> &'static [&'static str] {
        match self {
            Self::ChromeWindows => &[
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36",
            ],
            Self::ChromeMac => &[
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
            ],
            Self::FirefoxWindows => &[
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) Gecko/20100101 Firefox/120.0",
            ],
            Self::SafariMac => &[
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
            ],
        }
    }

    fn platform(&self) -> &'static str {
        match self {
            Self::ChromeWindows | Self::FirefoxWindows => "Win32",
            Self::ChromeMac | Self::SafariMac => "MacIntel",
        }
    }

    fn vendor(&self) -> &'static str {
        match self {
            Self::ChromeWindows | Self::ChromeMac => "Google Inc.",
            Self::FirefoxWindows => "",
            Self::SafariMac => "Apple Computer, Inc.",
        }
    }

    fn fonts(&self) -> Vec<&'static str> {
        let mut fonts = vec![
            "Arial",
            "Arial Black",
            "Comic Sans MS",
            "Courier New",
            "Georgia",
            "Impact",
            "Times New Roman",
            "Trebuchet MS",
            "Verdana",
        ];
        match self {
            Self::ChromeWindows | Self::FirefoxWindows => {
                fonts.extend(["Calibri", "Cambria", "Consolas", "Segoe UI"]);
            }
            Self::ChromeMac | Self::SafariMac => {
                fonts.extend(["Helvetica", "Helvetica Neue", "Menlo", "Monaco"]);
            }
        }
        fonts
    }
}

/// Screen resolutions weighted by real-world popularity.
const SCREEN_RESOLUTIONS: &[(u32, u32, u32)] = &[
    (1920, 1080, 30),
    (1366, 768, 20),
    (1536, 864, 15),
    (1440, 900, 10),
    (1280, 720, 8),
    (2560, 1440, 7),
    (1680, 1050, 5),
    (3840, 2160, 5),
];

/// WebGL vendor/renderer pairs observed in real browsers.
const WEBGL_CONFIGS: &[(&str, &str)] = &[
    (
        "Google Inc. (NVIDIA)",
        "ANGLE (NVIDIA GeForce GTX 1080 Direct3D11 vs_5_0 ps_5_0)",
    ),
    (
        "Google Inc. (Intel)",
        "ANGLE (Intel(R) UHD Graphics 630 Direct3D11 vs_5_0 ps_5_0)",
    ),
    (
        "Google Inc. (AMD)",
        "ANGLE (AMD Radeon RX 580 Series Direct3D11 vs_5_0 ps_5_0)",
    ),
    ("Intel Inc.", "Intel Iris OpenGL Engine"),
    ("Apple Inc.", "AMD Radeon Pro 5500M OpenGL Engine"),
];

/// Locale/timezone pairs. The source platform serves the Brazilian market,
/// so pt-BR identities dominate.
const LOCALES: &[(&str, &str)] = &[
    ("pt-BR", "America/Sao_Paulo"),
    ("pt-BR", "America/Fortaleza"),
    ("pt-BR", "America/Manaus"),
    ("pt-BR", "America/Recife"),
    ("pt-BR", "America/Bahia"),
    ("en-US", "America/New_York"),
    ("en-US", "America/Los_Angeles"),
];

/// Viewport dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// WebGL identity strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebGlIdentity {
    pub vendor: String,
    pub renderer: String,
}

/// A synthesized, internally-consistent browser identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fingerprint {
    pub user_agent: String,
    pub platform: String,
    pub vendor: String,
    pub viewport: Viewport,
    pub locale: String,
    pub timezone: String,
    pub languages: Vec<String>,
    pub webgl: WebGlIdentity,
    pub device_memory: u32,
    pub hardware_concurrency: u32,
    pub fonts: Vec<String>,
    pub canvas_noise_seed: u64,
    /// Short identity hash used for deduplication.
    pub hash: String,
}

/// Generator with per-process identity history.
pub struct FingerprintGenerator {
    used: HashSet<String>,
    prefer_brazilian: bool,
}

impl FingerprintGenerator {
    pub fn new() -> Self {
        Self {
            used: HashSet::new(),
            prefer_brazilian: true,
        }
    }

    /// Generate a fresh fingerprint.
    ///
    /// Never fails: regenerates on hash collision a bounded number of times,
    /// then accepts the profile anyway.
    pub fn generate(&mut self) -> Fingerprint {
        for _ in 0..16 {
            let fp = self.generate_once();
            if self.used.insert(fp.hash.clone()) {
                return fp;
            }
        }
        let fp = self.generate_once();
        self.used.insert(fp.hash.clone());
        fp
    }

    fn generate_once(&self) -> Fingerprint {
        let mut rng = rand::thread_rng();

        let Some(&family) = UaFamily::ALL.choose(&mut rng) else {
            return Self::default_profile();
        };
        let Some(&user_agent) = family.user_agents().choose(&mut rng) else {
            return Self::default_profile();
        };

        let (width, height) = weighted_resolution(&mut rng);

        let locale_pool: Vec<&(&str, &str)> = if self.prefer_brazilian {
            LOCALES.iter().filter(|(l, _)| l.starts_with("pt")).collect()
        } else {
            LOCALES.iter().collect()
        };
        let Some(&&(locale, timezone)) = locale_pool.choose(&mut rng) else {
            return Self::default_profile();
        };

        let Some(&(webgl_vendor, webgl_renderer)) = WEBGL_CONFIGS.choose(&mut rng) else {
            return Self::default_profile();
        };

        // Random subset of platform fonts, order preserved
        let mut fonts: Vec<String> = family.fonts().iter().map(|s| s.to_string()).collect();
        fonts.shuffle(&mut rng);
        fonts.truncate(8);

        let mut fp = Fingerprint {
            user_agent: user_agent.to_string(),
            platform: family.platform().to_string(),
            vendor: family.vendor().to_string(),
            viewport: Viewport { width, height },
            locale: locale.to_string(),
            timezone: timezone.to_string(),
            languages: languages_for(locale),
            webgl: WebGlIdentity {
                vendor: webgl_vendor.to_string(),
                renderer: webgl_renderer.to_string(),
            },
            device_memory: *[4u32, 8, 16, 32].choose(&mut rng).unwrap_or(&8),
            hardware_concurrency: *[4u32, 8, 12, 16].choose(&mut rng).unwrap_or(&8),
            fonts,
            canvas_noise_seed: rng.gen(),
            hash: String::new(),
        };
        fp.hash = identity_hash(&fp);
        fp
    }

    /// Fixed profile used when the selection tables are empty.
    fn default_profile() -> Fingerprint {
        let mut fp = Fingerprint {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
            platform: "Win32".to_string(),
            vendor: "Google Inc.".to_string(),
            viewport: Viewport {
                width: 1920,
                height: 1080,
            },
            locale: "pt-BR".to_string(),
            timezone: "America/Sao_Paulo".to_string(),
            languages: languages_for("pt-BR"),
            webgl: WebGlIdentity {
                vendor: "Google Inc. (Intel)".to_string(),
                renderer: "ANGLE (Intel(R) UHD Graphics 630 Direct3D11 vs_5_0 ps_5_0)".to_string(),
            },
            device_memory: 8,
            hardware_concurrency: 8,
            fonts: vec!["Arial".to_string(), "Verdana".to_string()],
            canvas_noise_seed: 0,
            hash: String::new(),
        };
        fp.hash = identity_hash(&fp);
        fp
    }

    /// Number of identities handed out so far.
    pub fn history_len(&self) -> usize {
        self.used.len()
    }

    /// Forget all previously issued identities.
    pub fn clear_history(&mut self) {
        self.used.clear();
    }
}

impl Default for FingerprintGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn weighted_resolution(rng: &mut impl Rng) -> (u32, u32) {
    let total: u32 = SCREEN_RESOLUTIONS.iter().map(|(_, _, w)| w).sum();
    if total == 0 {
        return (1920, 1080);
    }
    let mut pick = rng.gen_range(0..total);
    for &(w, h, weight) in SCREEN_RESOLUTIONS {
        if pick < weight {
            return (w, h);
        }
        pick -= weight;
    }
    (1920, 1080)
}

fn languages_for(locale: &str) -> Vec<String> {
    if locale.starts_with("pt") {
        vec![
            "pt-BR".to_string(),
            "pt".to_string(),
            "en-US".to_string(),
            "en".to_string(),
        ]
    } else {
        vec!["en-US".to_string(), "en".to_string()]
    }
}

/// Hash the identifying fields of a fingerprint.
fn identity_hash(fp: &Fingerprint) -> String {
    let mut hasher = Sha256::new();
    hasher.update(fp.user_agent.as_bytes());
    hasher.update(fp.viewport.width.to_le_bytes());
    hasher.update(fp.viewport.height.to_le_bytes());
    hasher.update(fp.locale.as_bytes());
    hasher.update(fp.timezone.as_bytes());
    hasher.update(fp.webgl.renderer.as_bytes());
    hasher.update(fp.device_memory.to_le_bytes());
    hasher.update(fp.canvas_noise_seed.to_le_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

/// Render the anti-detection script for a fingerprint.
///
/// Injected before any navigation: overrides navigator properties to match
/// the generated identity, removes automation flags, and adds noise to
/// canvas reads so the canvas hash differs per identity.
pub fn stealth_script(fp: &Fingerprint) -> String {
    let languages_js = fp
        .languages
        .iter()
        .map(|l| format!("'{}'", l))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"
Object.defineProperty(navigator, 'webdriver', {{
    get: () => undefined,
    configurable: true
}});

Object.defineProperty(navigator, 'platform', {{
    get: () => '{platform}',
    configurable: true
}});

Object.defineProperty(navigator, 'vendor', {{
    get: () => '{vendor}',
    configurable: true
}});

Object.defineProperty(navigator, 'languages', {{
    get: () => [{languages}],
    configurable: true
}});

Object.defineProperty(navigator, 'deviceMemory', {{
    get: () => {device_memory},
    configurable: true
}});

Object.defineProperty(navigator, 'hardwareConcurrency', {{
    get: () => {hardware_concurrency},
    configurable: true
}});

Object.defineProperty(navigator, 'plugins', {{
    get: () => [
        {{ name: 'Chrome PDF Plugin', filename: 'internal-pdf-viewer' }},
        {{ name: 'Chrome PDF Viewer', filename: 'mhjfbmdgcfjbbpaeojofohoefgiehjai' }},
        {{ name: 'Native Client', filename: 'internal-nacl-plugin' }}
    ],
    configurable: true
}});

const originalQuery = window.navigator.permissions.query;
window.navigator.permissions.query = (parameters) => (
    parameters.name === 'notifications' ?
        Promise.resolve({{ state: Notification.permission }}) :
        originalQuery(parameters)
);

const getParameter = WebGLRenderingContext.prototype.getParameter;
WebGLRenderingContext.prototype.getParameter = function(parameter) {{
    if (parameter === 37445) {{
        return '{webgl_vendor}';
    }}
    if (parameter === 37446) {{
        return '{webgl_renderer}';
    }}
    return getParameter.call(this, parameter);
}};

const noiseSeed = {noise_seed};
const originalGetImageData = CanvasRenderingContext2D.prototype.getImageData;
CanvasRenderingContext2D.prototype.getImageData = function(...args) {{
    const imageData = originalGetImageData.apply(this, args);
    let state = noiseSeed >>> 0;
    for (let i = 0; i < imageData.data.length; i += 4) {{
        state = (state * 1664525 + 1013904223) >>> 0;
        imageData.data[i] += (state % 3) - 1;
    }}
    return imageData;
}};

window.chrome = {{
    runtime: {{}},
    loadTimes: function() {{}},
    csi: function() {{}},
    app: {{}}
}};

delete window.cdc_adoQpoasnfa76pfcZLmcfl_Array;
delete window.cdc_adoQpoasnfa76pfcZLmcfl_Promise;
delete window.cdc_adoQpoasnfa76pfcZLmcfl_Symbol;
"#,
        platform = fp.platform,
        vendor = fp.vendor,
        languages = languages_js,
        device_memory = fp.device_memory,
        hardware_concurrency = fp.hardware_concurrency,
        webgl_vendor = fp.webgl.vendor,
        webgl_renderer = fp.webgl.renderer,
        noise_seed = fp.canvas_noise_seed as u32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_matches_user_agent() {
        let mut gen = FingerprintGenerator::new();
        for _ in 0..100 {
            let fp = gen.generate();
            if fp.user_agent.contains("Windows") {
                assert_eq!(fp.platform, "Win32", "ua: {}", fp.user_agent);
            } else if fp.user_agent.contains("Macintosh") {
                assert_eq!(fp.platform, "MacIntel", "ua: {}", fp.user_agent);
            } else {
                panic!("unexpected user agent family: {}", fp.user_agent);
            }
        }
    }

    #[test]
    fn test_languages_match_locale() {
        let mut gen = FingerprintGenerator::new();
        for _ in 0..50 {
            let fp = gen.generate();
            if fp.locale.starts_with("pt") {
                assert_eq!(fp.languages[0], "pt-BR");
            } else {
                assert_eq!(fp.languages[0], "en-US");
            }
        }
    }

    #[test]
    fn test_no_identity_reuse_within_run() {
        let mut gen = FingerprintGenerator::new();
        let mut hashes = HashSet::new();
        for _ in 0..50 {
            let fp = gen.generate();
            // Collisions are regenerated, so every returned hash is new
            assert!(hashes.insert(fp.hash));
        }
        assert_eq!(gen.history_len(), 50);
    }

    #[test]
    fn test_stealth_script_carries_identity() {
        let mut gen = FingerprintGenerator::new();
        let fp = gen.generate();
        let script = stealth_script(&fp);
        assert!(script.contains(&fp.platform));
        assert!(script.contains(&fp.webgl.renderer));
        assert!(script.contains("webdriver"));
        assert!(script.contains("cdc_adoQpoasnfa76pfcZLmcfl_Array"));
    }

    #[test]
    fn test_default_profile_is_consistent() {
        let fp = FingerprintGenerator::default_profile();
        assert_eq!(fp.platform, "Win32");
        assert!(fp.user_agent.contains("Windows"));
        assert!(!fp.hash.is_empty());
    }
}
