use std::time::Duration;

use log::warn;

use crate::core::renderer::api::BackendKind;

/// Pacing interval between frames (~60 frames per second).
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(16);

pub const ENV_FRAME_MS: &str = "VIEWPORT_HOST_FRAME_MS";
pub const ENV_THREAD_NAME: &str = "VIEWPORT_HOST_THREAD_NAME";
pub const ENV_VALIDATION: &str = "VIEWPORT_HOST_VALIDATION";
pub const ENV_BACKEND: &str = "VIEWPORT_HOST_BACKEND";

/// Renderer settings shared by the lifecycle engine and the backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendererConfig {
    /// Fixed sleep after every loop iteration, independent of frame cost.
    pub frame_interval: Duration,
    /// Name given to the background render thread.
    pub thread_name: String,
    /// Reported to the Vulkan driver as application and engine name.
    pub application_name: String,
    /// Enables the Khronos validation layer and the debug messenger when available.
    pub validation: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frame_interval: DEFAULT_FRAME_INTERVAL,
            thread_name: "render-thread".to_owned(),
            application_name: "viewport-host".to_owned(),
            validation: cfg!(debug_assertions),
        }
    }
}

impl RendererConfig {
    /// Defaults overridden by `VIEWPORT_HOST_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_FRAME_MS) {
            match raw.trim().parse::<u64>() {
                Ok(ms) => config.frame_interval = Duration::from_millis(ms),
                Err(_) => warn!("ignoring {ENV_FRAME_MS}={raw:?}: not a whole number of ms"),
            }
        }

        if let Some(name) = lookup(ENV_THREAD_NAME).filter(|n| !n.trim().is_empty()) {
            config.thread_name = name;
        }

        if let Some(raw) = lookup(ENV_VALIDATION) {
            match parse_flag(&raw) {
                Some(flag) => config.validation = flag,
                None => warn!("ignoring {ENV_VALIDATION}={raw:?}: expected on/off"),
            }
        }

        config
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }
}

/// Backend used when `VIEWPORT_HOST_BACKEND` is unset.
pub const fn default_backend() -> BackendKind {
    if cfg!(feature = "opengl") {
        BackendKind::OpenGl
    } else {
        BackendKind::Vulkan
    }
}

/// Backend named by `VIEWPORT_HOST_BACKEND`, else [`default_backend`].
pub fn backend_from_env() -> BackendKind {
    backend_from_lookup(|key| std::env::var(key).ok())
}

pub(crate) fn backend_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> BackendKind {
    let Some(raw) = lookup(ENV_BACKEND) else {
        return default_backend();
    };
    raw.parse().unwrap_or_else(|err| {
        warn!("ignoring {ENV_BACKEND}: {err}");
        default_backend()
    })
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_keeps_defaults() {
        assert_eq!(RendererConfig::from_lookup(|_| None), RendererConfig::default());
    }

    #[test]
    fn environment_overrides_pacing_and_validation() {
        let config = RendererConfig::from_lookup(lookup(&[
            (ENV_FRAME_MS, "33"),
            (ENV_VALIDATION, "off"),
            (ENV_THREAD_NAME, "gl-worker"),
        ]));
        assert_eq!(config.frame_interval, Duration::from_millis(33));
        assert!(!config.validation);
        assert_eq!(config.thread_name, "gl-worker");
    }

    #[test]
    fn malformed_values_fall_back() {
        let config = RendererConfig::from_lookup(lookup(&[
            (ENV_FRAME_MS, "fast"),
            (ENV_VALIDATION, "maybe"),
            (ENV_THREAD_NAME, "  "),
        ]));
        assert_eq!(config, RendererConfig::default());
    }

    #[test]
    fn backend_choice_comes_from_environment() {
        assert_eq!(
            backend_from_lookup(lookup(&[(ENV_BACKEND, "vulkan")])),
            BackendKind::Vulkan
        );
        assert_eq!(backend_from_lookup(lookup(&[(ENV_BACKEND, "gl")])), BackendKind::OpenGl);
        assert_eq!(
            backend_from_lookup(lookup(&[(ENV_BACKEND, "directx")])),
            default_backend()
        );
        assert_eq!(backend_from_lookup(|_| None), default_backend());
    }
}
