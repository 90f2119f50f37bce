//! The settings snapshot consulted by sampling decisions, and the store that holds it.
//!
//! Settings come from two places: the local configuration (tracing mode and file-configured
//! rates) and values pushed out-of-band by a collector (global and per-layer rates with
//! flags and timestamps). The store hands out immutable snapshots, so a refresh happening
//! concurrently with a decision is either entirely seen or entirely not.

use super::{SampleRate, SampleSource, TracingMode, DEFAULT_SAMPLE_RATE};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Flags attached to pushed settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct SettingsFlags(u16);

impl SettingsFlags {
    pub const OK: SettingsFlags = SettingsFlags(0x0);
    /// The collector marked this setting unusable.
    pub const INVALID: SettingsFlags = SettingsFlags(0x1);
    /// The pushed global rate beats a locally configured one.
    pub const OVERRIDE: SettingsFlags = SettingsFlags(0x2);
    /// New traces may be started.
    pub const SAMPLE_START: SettingsFlags = SettingsFlags(0x4);
    /// Upstream traces may be continued, subject to a roll.
    pub const SAMPLE_THROUGH: SettingsFlags = SettingsFlags(0x8);
    /// Upstream traces are always continued.
    pub const SAMPLE_THROUGH_ALWAYS: SettingsFlags = SettingsFlags(0x10);
    /// Synthetic (hinted) traffic is always sampled.
    pub const SAMPLE_AVW_ALWAYS: SettingsFlags = SettingsFlags(0x20);

    /// What applies when nothing has been pushed.
    pub const LOCAL_DEFAULT: SettingsFlags = SettingsFlags(0x4 | 0x10);

    pub const fn from_bits(bits: u16) -> Self {
        SettingsFlags(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: SettingsFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for SettingsFlags {
    type Output = SettingsFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        SettingsFlags(self.0 | rhs.0)
    }
}

/// A rate pushed by a collector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DynamicSetting {
    pub rate: SampleRate,
    pub flags: SettingsFlags,
    pub timestamp: SystemTime,
    /// How long the setting stays authoritative. `None` never expires.
    pub ttl: Option<Duration>,
}

impl DynamicSetting {
    pub fn new(rate: SampleRate, flags: SettingsFlags) -> Self {
        DynamicSetting {
            rate,
            flags,
            timestamp: SystemTime::now(),
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_timestamp(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_fresh(&self, now: SystemTime) -> bool {
        match self.ttl {
            None => true,
            // a timestamp from the future counts as fresh
            Some(ttl) => now
                .duration_since(self.timestamp)
                .map(|age| age <= ttl)
                .unwrap_or(true),
        }
    }

    fn is_usable(&self) -> bool {
        !self.flags.contains(SettingsFlags::INVALID)
    }
}

/// The locally configured global rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ConfiguredRate {
    #[default]
    Unset,
    Rate(SampleRate),
    /// A configured value outside `0..=RESOLUTION`, kept for diagnostics.
    Misconfigured(i64),
}

/// A locally configured per-layer rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayerRate {
    pub rate: SampleRate,
    /// Flags to apply instead of the pushed global ones.
    pub flags: Option<SettingsFlags>,
}

impl From<SampleRate> for LayerRate {
    fn from(rate: SampleRate) -> Self {
        LayerRate { rate, flags: None }
    }
}

/// The outcome of looking up which rate governs a layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedRate {
    pub rate: SampleRate,
    pub source: SampleSource,
    /// Flags of the pushed setting that was consulted, if any.
    pub flags: Option<SettingsFlags>,
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Settings {
    pub tracing_mode: TracingMode,
    pub sample_rate: ConfiguredRate,
    /// Locally configured per-layer rates.
    pub layer_rates: BTreeMap<String, LayerRate>,
    /// The pushed global setting.
    pub pushed_default: Option<DynamicSetting>,
    /// Pushed per-layer settings.
    pub pushed_layers: BTreeMap<String, DynamicSetting>,
}

impl Settings {
    /// Which rate governs `layer` at `now`, and where it came from.
    pub fn resolve_rate(&self, layer: &str, now: SystemTime) -> ResolvedRate {
        let pushed_layer = self.pushed_layers.get(layer).filter(|s| s.is_usable());
        let pushed_default = self.pushed_default.as_ref().filter(|s| s.is_usable());

        if let Some(s) = pushed_layer.filter(|s| s.is_fresh(now)) {
            return ResolvedRate {
                rate: s.rate,
                source: SampleSource::Oboe,
                flags: Some(s.flags),
            };
        }

        if let Some(l) = self.layer_rates.get(layer) {
            return ResolvedRate {
                rate: l.rate,
                source: SampleSource::File,
                flags: l.flags.or_else(|| pushed_default.map(|s| s.flags)),
            };
        }

        if let Some(s) = pushed_default.filter(|s| s.is_fresh(now)) {
            return match self.sample_rate {
                ConfiguredRate::Rate(rate) if !s.flags.contains(SettingsFlags::OVERRIDE) => {
                    ResolvedRate {
                        rate,
                        source: SampleSource::File,
                        flags: Some(s.flags),
                    }
                }
                _ => ResolvedRate {
                    rate: s.rate,
                    source: SampleSource::OboeDefault,
                    flags: Some(s.flags),
                },
            };
        }

        if let Some(s) = pushed_layer.or(pushed_default) {
            return ResolvedRate {
                rate: s.rate,
                source: SampleSource::LastOboe,
                flags: Some(s.flags),
            };
        }

        match self.sample_rate {
            ConfiguredRate::Rate(rate) => ResolvedRate {
                rate,
                source: SampleSource::File,
                flags: None,
            },
            ConfiguredRate::Misconfigured(_) => ResolvedRate {
                rate: DEFAULT_SAMPLE_RATE,
                source: SampleSource::DefaultMisconfigured,
                flags: None,
            },
            ConfiguredRate::Unset => ResolvedRate {
                rate: DEFAULT_SAMPLE_RATE,
                source: SampleSource::Default,
                flags: None,
            },
        }
    }
}

/// A shared, swappable settings register.
///
/// Clones share the same register. Readers take a snapshot and keep using it for the
/// whole decision; writers swap in a whole new `Settings`.
#[derive(Clone, Debug, Default)]
pub struct SettingsStore {
    current: Arc<RwLock<Arc<Settings>>>,
}

impl SettingsStore {
    pub fn new(settings: Settings) -> Self {
        SettingsStore {
            current: Arc::new(RwLock::new(Arc::new(settings))),
        }
    }

    pub fn snapshot(&self) -> Arc<Settings> {
        self.current.read().clone()
    }

    pub fn replace(&self, settings: Settings) {
        *self.current.write() = Arc::new(settings);
    }

    /// Clone the current settings, modify the clone, and swap it in.
    pub fn update<F: FnOnce(&mut Settings)>(&self, f: F) {
        let mut guard = self.current.write();
        let mut next = Settings::clone(&guard);
        f(&mut next);
        *guard = Arc::new(next);
    }

    pub fn set_tracing_mode(&self, mode: TracingMode) {
        tracing::debug!(?mode, "Tracing mode set");
        self.update(|s| s.tracing_mode = mode);
    }

    pub fn set_default_sample_rate(&self, rate: SampleRate) {
        tracing::debug!(rate = rate.get(), "Default sample rate set");
        self.update(|s| s.sample_rate = ConfiguredRate::Rate(rate));
    }

    pub fn push_default(&self, setting: DynamicSetting) {
        self.update(|s| s.pushed_default = Some(setting));
    }

    pub fn push_layer<S: Into<String>>(&self, layer: S, setting: DynamicSetting) {
        let layer = layer.into();
        self.update(|s| {
            s.pushed_layers.insert(layer, setting);
        });
    }
}

impl From<Settings> for SettingsStore {
    fn from(settings: Settings) -> Self {
        SettingsStore::new(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate(r: u32) -> SampleRate {
        SampleRate::new(r).unwrap()
    }

    #[test]
    fn nothing_configured_uses_default() {
        let resolved = Settings::default().resolve_rate("http", SystemTime::now());
        assert_eq!(resolved.rate, DEFAULT_SAMPLE_RATE);
        assert_eq!(resolved.source, SampleSource::Default);
        assert_eq!(resolved.flags, None);
    }

    #[test]
    fn misconfigured_rate_falls_back() {
        let settings = Settings {
            sample_rate: ConfiguredRate::Misconfigured(2_000_000),
            ..Default::default()
        };
        let resolved = settings.resolve_rate("http", SystemTime::now());
        assert_eq!(resolved.rate, DEFAULT_SAMPLE_RATE);
        assert_eq!(resolved.source, SampleSource::DefaultMisconfigured);
    }

    #[test]
    fn precedence() {
        let now = SystemTime::now();
        let mut settings = Settings {
            sample_rate: ConfiguredRate::Rate(rate(100)),
            ..Default::default()
        };
        assert_eq!(settings.resolve_rate("http", now).source, SampleSource::File);

        settings.pushed_default = Some(DynamicSetting::new(rate(200), SettingsFlags::SAMPLE_START));
        let resolved = settings.resolve_rate("http", now);
        assert_eq!((resolved.rate, resolved.source), (rate(100), SampleSource::File));
        assert_eq!(resolved.flags, Some(SettingsFlags::SAMPLE_START));

        settings.pushed_default = Some(DynamicSetting::new(
            rate(200),
            SettingsFlags::SAMPLE_START | SettingsFlags::OVERRIDE,
        ));
        let resolved = settings.resolve_rate("http", now);
        assert_eq!((resolved.rate, resolved.source), (rate(200), SampleSource::OboeDefault));

        settings.layer_rates.insert("http".to_owned(), rate(300).into());
        let resolved = settings.resolve_rate("http", now);
        assert_eq!((resolved.rate, resolved.source), (rate(300), SampleSource::File));
        assert_eq!(
            settings.resolve_rate("db", now).source,
            SampleSource::OboeDefault
        );

        settings.pushed_layers.insert(
            "http".to_owned(),
            DynamicSetting::new(rate(400), SettingsFlags::SAMPLE_THROUGH),
        );
        let resolved = settings.resolve_rate("http", now);
        assert_eq!((resolved.rate, resolved.source), (rate(400), SampleSource::Oboe));
        assert_eq!(resolved.flags, Some(SettingsFlags::SAMPLE_THROUGH));
    }

    #[test]
    fn stale_pushed_settings_become_last_known() {
        let now = SystemTime::now();
        let settings = Settings {
            sample_rate: ConfiguredRate::Rate(rate(100)),
            pushed_default: Some(
                DynamicSetting::new(rate(500), SettingsFlags::LOCAL_DEFAULT)
                    .with_timestamp(now - Duration::from_secs(600))
                    .with_ttl(Duration::from_secs(120)),
            ),
            ..Default::default()
        };
        let resolved = settings.resolve_rate("http", now);
        assert_eq!((resolved.rate, resolved.source), (rate(500), SampleSource::LastOboe));
    }

    #[test]
    fn invalid_pushed_settings_are_ignored() {
        let settings = Settings {
            pushed_default: Some(DynamicSetting::new(rate(500), SettingsFlags::INVALID)),
            ..Default::default()
        };
        assert_eq!(
            settings.resolve_rate("http", SystemTime::now()).source,
            SampleSource::Default
        );
    }

    #[test]
    fn store_snapshots_are_stable() {
        let store = SettingsStore::default();
        let before = store.snapshot();
        let shared = store.clone();
        shared.set_tracing_mode(TracingMode::Never);
        shared.set_default_sample_rate(rate(42));

        assert_eq!(before.tracing_mode, TracingMode::Always);
        assert_eq!(before.sample_rate, ConfiguredRate::Unset);

        let after = store.snapshot();
        assert_eq!(after.tracing_mode, TracingMode::Never);
        assert_eq!(after.sample_rate, ConfiguredRate::Rate(rate(42)));
    }

    #[test]
    fn concurrent_readers_see_whole_updates() {
        let store = SettingsStore::default();
        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 0..1000u32 {
                    store.replace(Settings {
                        sample_rate: ConfiguredRate::Rate(rate(i)),
                        layer_rates: [("l".to_owned(), rate(i).into())].into_iter().collect(),
                        ..Default::default()
                    });
                }
            })
        };
        for _ in 0..1000 {
            let s = store.snapshot();
            if let ConfiguredRate::Rate(r) = s.sample_rate {
                assert_eq!(s.layer_rates.get("l").map(|l| l.rate), Some(r));
            }
        }
        writer.join().unwrap();
    }
}
