//! Backing service endpoints.

use std::time::Duration;

/// The HTTP services the tools forward to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    AudioId,
    ImageOpt,
    Overlay,
    Dispatcher,
    Monitor,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub audio_id_url: String,
    pub image_opt_url: String,
    pub overlay_url: String,
    pub dispatcher_url: String,
    pub monitor_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            audio_id_url: "http://audio-id:8000".to_string(),
            image_opt_url: "http://image-opt:8000".to_string(),
            overlay_url: "http://overlay:8000".to_string(),
            dispatcher_url: "http://dispatcher:8000".to_string(),
            monitor_url: "http://monitor:8000".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

impl ServiceConfig {
    /// Defaults overridden by `AUDIO_ID_URL`, `IMAGE_OPT_URL`, `OVERLAY_URL`,
    /// `DISPATCHER_URL`, `MONITOR_URL` and `PROXY_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let d = Self::default();
        let var = |key: &str, default: String| std::env::var(key).unwrap_or(default);
        Self {
            audio_id_url: var("AUDIO_ID_URL", d.audio_id_url),
            image_opt_url: var("IMAGE_OPT_URL", d.image_opt_url),
            overlay_url: var("OVERLAY_URL", d.overlay_url),
            dispatcher_url: var("DISPATCHER_URL", d.dispatcher_url),
            monitor_url: var("MONITOR_URL", d.monitor_url),
            timeout: std::env::var("PROXY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(d.timeout),
        }
    }

    /// Point every service at one base URL. Useful for a single gateway or in tests.
    pub fn all_at(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            audio_id_url: base.clone(),
            image_opt_url: base.clone(),
            overlay_url: base.clone(),
            dispatcher_url: base.clone(),
            monitor_url: base,
            ..Self::default()
        }
    }

    pub fn base_url(&self, service: Service) -> &str {
        match service {
            Service::AudioId => &self.audio_id_url,
            Service::ImageOpt => &self.image_opt_url,
            Service::Overlay => &self.overlay_url,
            Service::Dispatcher => &self.dispatcher_url,
            Service::Monitor => &self.monitor_url,
        }
    }
}
