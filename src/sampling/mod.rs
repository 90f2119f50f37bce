//! Per-operation sampling decisions.
//!
//! A decision combines the tracing mode, the rate that governs the operation's layer (see
//! [`settings::Settings::resolve_rate`]) and whether the operation continues an upstream
//! trace. The outcome carries the rate and where it came from, and packs into a single
//! `u32` for hosts that want one number back.

pub mod settings;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::identity::Identity;
use rand::Rng;
use settings::{ResolvedRate, Settings, SettingsFlags, SettingsStore};
use std::time::SystemTime;

/// Rates are expressed in parts per `RESOLUTION`.
pub const RESOLUTION: u32 = 1_000_000;

/// The rate used when nothing else is configured.
pub const DEFAULT_SAMPLE_RATE: SampleRate = SampleRate(300_000);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum TracingMode {
    /// Nothing is sampled.
    Never,
    /// New traces may start, and upstream traces are continued.
    #[default]
    Always,
    /// Only upstream traces are continued.
    Through,
}

impl TryFrom<i64> for TracingMode {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            0 => Ok(TracingMode::Never),
            1 => Ok(TracingMode::Always),
            2 => Ok(TracingMode::Through),
            _ => Err(Error::InvalidArgument(format!(
                "tracing mode must be 0 (never), 1 (always) or 2 (through), got {value}"
            ))),
        }
    }
}

impl From<TracingMode> for i64 {
    fn from(mode: TracingMode) -> Self {
        match mode {
            TracingMode::Never => 0,
            TracingMode::Always => 1,
            TracingMode::Through => 2,
        }
    }
}

impl std::str::FromStr for TracingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "never" => Ok(TracingMode::Never),
            "always" => Ok(TracingMode::Always),
            "through" => Ok(TracingMode::Through),
            _ => Err(Error::InvalidArgument(format!(
                "unknown tracing mode {s:?}"
            ))),
        }
    }
}

/// Where a sampling rate came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SampleSource {
    File = 1,
    Default = 2,
    /// A fresh per-layer setting pushed by the collector.
    Oboe = 3,
    /// A pushed setting past its time to live.
    LastOboe = 4,
    DefaultMisconfigured = 5,
    /// The fresh global setting pushed by the collector.
    OboeDefault = 6,
}

impl TryFrom<u8> for SampleSource {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            1 => SampleSource::File,
            2 => SampleSource::Default,
            3 => SampleSource::Oboe,
            4 => SampleSource::LastOboe,
            5 => SampleSource::DefaultMisconfigured,
            6 => SampleSource::OboeDefault,
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "unknown sample source {value}"
                )))
            }
        })
    }
}

/// A sampling rate in parts per [`RESOLUTION`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SampleRate(u32);

impl SampleRate {
    pub const NEVER: SampleRate = SampleRate(0);
    pub const ALWAYS: SampleRate = SampleRate(RESOLUTION);

    pub fn new(rate: u32) -> Result<Self> {
        if rate > RESOLUTION {
            return Err(Error::InvalidArgument(format!(
                "sample rate must be between 0 and {RESOLUTION}, got {rate}"
            )));
        }
        Ok(SampleRate(rate))
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl TryFrom<i64> for SampleRate {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        u32::try_from(value)
            .map_err(|_| {
                Error::InvalidArgument(format!(
                    "sample rate must be between 0 and {RESOLUTION}, got {value}"
                ))
            })
            .and_then(SampleRate::new)
    }
}

impl std::fmt::Display for SampleRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleDecision {
    pub sampled: bool,
    pub rate: SampleRate,
    pub source: SampleSource,
}

impl SampleDecision {
    /// `0` when not sampled, otherwise the source in the high byte and the rate in the low
    /// three.
    pub fn packed(&self) -> u32 {
        if !self.sampled {
            return 0;
        }
        ((self.source as u32) << 24) | (self.rate.get() & 0xFF_FFFF)
    }

    /// Recover a sampled decision. `0` (unsampled) and unknown sources yield `None`.
    pub fn from_packed(packed: u32) -> Option<SampleDecision> {
        if packed == 0 {
            return None;
        }
        let source = SampleSource::try_from((packed >> 24) as u8).ok()?;
        let rate = SampleRate::new(packed & 0xFF_FFFF).ok()?;
        Some(SampleDecision {
            sampled: true,
            rate,
            source,
        })
    }
}

/// Makes sampling decisions against a shared settings register.
#[derive(Clone, Debug, Default)]
pub struct Sampler {
    settings: SettingsStore,
}

impl Sampler {
    pub fn new(settings: SettingsStore) -> Self {
        Sampler { settings }
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    /// Decide whether the operation on `layer` is sampled.
    ///
    /// `xtrace` is the inbound wire string, if any; an empty or malformed one counts as no
    /// upstream trace. `hint` marks synthetic traffic.
    pub fn sample(&self, layer: &str, xtrace: Option<&str>, hint: Option<&str>) -> SampleDecision {
        self.sample_with_rng(layer, xtrace, hint, &mut rand::thread_rng())
    }

    pub fn sample_with_rng<R: Rng + ?Sized>(
        &self,
        layer: &str,
        xtrace: Option<&str>,
        hint: Option<&str>,
        rng: &mut R,
    ) -> SampleDecision {
        let upstream = xtrace.map(upstream_identity).unwrap_or(false);
        let settings = self.settings.snapshot();
        decide(&settings, layer, upstream, hint, SystemTime::now(), rng)
    }

    /// Like [`Sampler::sample`], with the context's current identity as the inbound one.
    pub fn sample_context(&self, layer: &str, ctx: &Context, hint: Option<&str>) -> SampleDecision {
        let settings = self.settings.snapshot();
        decide(
            &settings,
            layer,
            ctx.is_valid(),
            hint,
            SystemTime::now(),
            &mut rand::thread_rng(),
        )
    }
}

impl From<SettingsStore> for Sampler {
    fn from(settings: SettingsStore) -> Self {
        Sampler::new(settings)
    }
}

fn upstream_identity(xtrace: &str) -> bool {
    if xtrace.is_empty() {
        return false;
    }
    match Identity::from_text(xtrace) {
        Ok(id) => id.is_valid(),
        Err(e) => {
            tracing::debug!(xtrace, error = %e, "Ignoring malformed inbound X-Trace");
            false
        }
    }
}

/// The decision procedure, over an explicit settings snapshot and clock.
pub fn decide<R: Rng + ?Sized>(
    settings: &Settings,
    layer: &str,
    upstream: bool,
    hint: Option<&str>,
    now: SystemTime,
    rng: &mut R,
) -> SampleDecision {
    let resolved = settings.resolve_rate(layer, now);
    let flags = resolved.flags.unwrap_or(SettingsFlags::LOCAL_DEFAULT);
    let hinted = hint.map(|h| !h.is_empty()).unwrap_or(false);

    let sampled = match settings.tracing_mode {
        TracingMode::Never => false,
        _ if upstream => {
            if flags.contains(SettingsFlags::SAMPLE_THROUGH_ALWAYS) {
                true
            } else if flags.contains(SettingsFlags::SAMPLE_THROUGH) {
                roll(resolved.rate, rng)
            } else {
                false
            }
        }
        TracingMode::Through => false,
        TracingMode::Always => {
            if hinted && flags.contains(SettingsFlags::SAMPLE_AVW_ALWAYS) {
                true
            } else if flags.contains(SettingsFlags::SAMPLE_START) {
                roll(resolved.rate, rng)
            } else {
                false
            }
        }
    };

    let ResolvedRate { rate, source, .. } = resolved;
    tracing::debug!(
        layer,
        upstream,
        sampled,
        rate = rate.get(),
        ?source,
        mode = ?settings.tracing_mode,
        "Sampling decision"
    );
    SampleDecision {
        sampled,
        rate,
        source,
    }
}

fn roll<R: Rng + ?Sized>(rate: SampleRate, rng: &mut R) -> bool {
    match rate.get() {
        0 => false,
        r if r >= RESOLUTION => true,
        r => rng.gen_range(0..RESOLUTION) < r,
    }
}

#[cfg(test)]
mod tests {
    use super::settings::{ConfiguredRate, DynamicSetting};
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sampler(settings: Settings) -> Sampler {
        Sampler::new(SettingsStore::new(settings))
    }

    fn file_rate(rate: u32) -> Settings {
        Settings {
            sample_rate: ConfiguredRate::Rate(SampleRate::new(rate).unwrap()),
            ..Default::default()
        }
    }

    #[test]
    fn tracing_mode_from_host_values() {
        assert_eq!(TracingMode::try_from(0), Ok(TracingMode::Never));
        assert_eq!(TracingMode::try_from(2), Ok(TracingMode::Through));
        assert!(matches!(
            TracingMode::try_from(3),
            Err(Error::InvalidArgument(_))
        ));
        assert!(TracingMode::try_from(-1).is_err());
        assert_eq!("THROUGH".parse(), Ok(TracingMode::Through));
        assert_eq!(i64::from(TracingMode::Always), 1);
    }

    #[test]
    fn sample_rate_bounds() {
        assert_eq!(SampleRate::new(RESOLUTION), Ok(SampleRate::ALWAYS));
        assert!(SampleRate::new(RESOLUTION + 1).is_err());
        assert!(SampleRate::try_from(-5i64).is_err());
        assert_eq!(SampleRate::try_from(0i64), Ok(SampleRate::NEVER));
    }

    #[test]
    fn packing() {
        let decision = SampleDecision {
            sampled: true,
            rate: SampleRate::new(500_000).unwrap(),
            source: SampleSource::Default,
        };
        let packed = decision.packed();
        assert_eq!(packed & 0xFF_FFFF, 500_000);
        assert_eq!(packed >> 24, 2);
        assert_eq!(SampleDecision::from_packed(packed), Some(decision));

        let unsampled = SampleDecision {
            sampled: false,
            ..decision
        };
        assert_eq!(unsampled.packed(), 0);
        assert_eq!(SampleDecision::from_packed(0), None);
        assert_eq!(SampleDecision::from_packed(0x0900_0001), None);
    }

    #[test]
    fn frequency_tracks_rate() {
        let mut rng = StdRng::seed_from_u64(7);
        let sampler = sampler(file_rate(250_000));
        let n = 100_000;
        let hits = (0..n)
            .filter(|_| sampler.sample_with_rng("http", None, None, &mut rng).sampled)
            .count();
        let freq = hits as f64 / n as f64;
        assert!((freq - 0.25).abs() < 0.01, "observed {freq}");
    }

    #[test]
    fn rate_extremes() {
        let mut rng = StdRng::seed_from_u64(1);
        let never = sampler(file_rate(0));
        let always = sampler(file_rate(RESOLUTION));
        for _ in 0..1000 {
            assert!(!never.sample_with_rng("l", None, None, &mut rng).sampled);
            assert!(always.sample_with_rng("l", None, None, &mut rng).sampled);
        }
    }

    #[test]
    fn never_mode_samples_nothing() {
        let mut rng = StdRng::seed_from_u64(2);
        let upstream = Identity::random().to_text().unwrap();
        let sampler = sampler(Settings {
            tracing_mode: TracingMode::Never,
            ..file_rate(RESOLUTION)
        });
        for _ in 0..100 {
            let d = sampler.sample_with_rng("l", Some(&upstream), Some("avw"), &mut rng);
            assert!(!d.sampled);
            assert_eq!(d.packed(), 0);
        }
    }

    #[test]
    fn default_rate_when_unconfigured() {
        let d = Sampler::default().sample("l", None, None);
        assert_eq!(d.rate, DEFAULT_SAMPLE_RATE);
        assert_eq!(d.source, SampleSource::Default);
    }

    #[test]
    fn continuing_a_trace() {
        let mut rng = StdRng::seed_from_u64(3);
        let upstream = Identity::random().to_text().unwrap();

        // no pushed flags: the upstream decision is honoured even at rate 0
        let through = sampler(Settings {
            tracing_mode: TracingMode::Through,
            ..file_rate(0)
        });
        assert!(through.sample_with_rng("l", Some(&upstream), None, &mut rng).sampled);
        assert!(!through.sample_with_rng("l", None, None, &mut rng).sampled);

        let store = SettingsStore::new(file_rate(0));
        store.push_default(DynamicSetting::new(
            SampleRate::NEVER,
            SettingsFlags::SAMPLE_START | SettingsFlags::SAMPLE_THROUGH,
        ));
        let rolled = Sampler::new(store.clone());
        assert!(!rolled.sample_with_rng("l", Some(&upstream), None, &mut rng).sampled);

        store.push_default(DynamicSetting::new(SampleRate::ALWAYS, SettingsFlags::SAMPLE_START));
        assert!(!rolled.sample_with_rng("l", Some(&upstream), None, &mut rng).sampled);
    }

    #[test]
    fn malformed_or_empty_inbound_is_a_new_trace() {
        let mut rng = StdRng::seed_from_u64(4);
        let through = sampler(Settings {
            tracing_mode: TracingMode::Through,
            ..file_rate(RESOLUTION)
        });
        let blank = Identity::blank().to_string();
        for inbound in ["", "garbage", "2B00", blank.as_str()] {
            assert!(!through.sample_with_rng("l", Some(inbound), None, &mut rng).sampled);
        }

        let always = sampler(file_rate(RESOLUTION));
        assert!(always.sample_with_rng("l", Some(""), None, &mut rng).sampled);
    }

    #[test]
    fn start_requires_flag_when_pushed() {
        let mut rng = StdRng::seed_from_u64(5);
        let store = SettingsStore::default();
        store.push_default(
            DynamicSetting::new(SampleRate::ALWAYS, SettingsFlags::OVERRIDE)
                .with_ttl(std::time::Duration::from_secs(60)),
        );
        let sampler = Sampler::new(store.clone());
        let d = sampler.sample_with_rng("l", None, None, &mut rng);
        assert!(!d.sampled);
        assert_eq!(d.source, SampleSource::OboeDefault);

        store.push_default(DynamicSetting::new(
            SampleRate::NEVER,
            SettingsFlags::OVERRIDE | SettingsFlags::SAMPLE_AVW_ALWAYS | SettingsFlags::SAMPLE_START,
        ));
        assert!(!sampler.sample_with_rng("l", None, None, &mut rng).sampled);
        assert!(!sampler.sample_with_rng("l", None, Some(""), &mut rng).sampled);
        assert!(sampler.sample_with_rng("l", None, Some("synthetic"), &mut rng).sampled);
    }

    #[test]
    fn context_as_inbound() {
        let through = sampler(Settings {
            tracing_mode: TracingMode::Through,
            ..file_rate(0)
        });
        let mut ctx = Context::new();
        assert!(!through.sample_context("l", &ctx, None).sampled);
        ctx.set(Identity::random());
        assert!(through.sample_context("l", &ctx, None).sampled);
    }
}
