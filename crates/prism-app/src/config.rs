//! Application configuration.

use anyhow::{bail, Context};

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Window title, also reported to the driver as the application name.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    /// Target frames per second (None for unlimited).
    pub target_fps: Option<u32>,
    /// Log filter used when `RUST_LOG` is not set.
    pub log_filter: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Prism".to_string(),
            width: 1280,
            height: 720,
            validation: cfg!(debug_assertions),
            target_fps: None,
            log_filter: None,
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Set the target FPS.
    pub fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = Some(fps);
        self
    }

    /// Set the fallback log filter.
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }

    /// Apply the process arguments on top of `self`.
    ///
    /// Returns the arguments this config does not understand, in order.
    pub fn from_args(self) -> anyhow::Result<(Self, Vec<String>)> {
        self.parse_args(std::env::args().skip(1))
    }

    /// Apply command line flags on top of `self`.
    ///
    /// Recognized: `--width N`, `--height N`, `--validation`,
    /// `--no-validation`, `--fps N` and `--log FILTER`. Everything else is
    /// returned untouched.
    pub fn parse_args<I, S>(mut self, args: I) -> anyhow::Result<(Self, Vec<String>)>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut rest = Vec::new();
        let mut args = args.into_iter().map(Into::into);

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--width" => self.width = parse_dimension(&arg, args.next())?,
                "--height" => self.height = parse_dimension(&arg, args.next())?,
                "--validation" => self.validation = true,
                "--no-validation" => self.validation = false,
                "--fps" => {
                    let fps: u32 = parse_value(&arg, args.next())?;
                    // Zero means unlimited.
                    self.target_fps = (fps > 0).then_some(fps);
                }
                "--log" => {
                    let filter = args.next().with_context(|| format!("{arg} needs a value"))?;
                    self.log_filter = Some(filter);
                }
                _ => rest.push(arg),
            }
        }

        Ok((self, rest))
    }
}

fn parse_value<T>(flag: &str, value: Option<String>) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = value.with_context(|| format!("{flag} needs a value"))?;
    value
        .parse()
        .with_context(|| format!("Invalid value for {flag}: {value:?}"))
}

fn parse_dimension(flag: &str, value: Option<String>) -> anyhow::Result<u32> {
    let size: u32 = parse_value(flag, value)?;
    if size == 0 {
        bail!("{flag} must be greater than zero");
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<(AppConfig, Vec<String>)> {
        AppConfig::new("test").parse_args(args.iter().copied())
    }

    #[test]
    fn no_args_keeps_defaults() {
        let (config, rest) = parse(&[]).unwrap();
        assert_eq!(config, AppConfig::new("test"));
        assert!(rest.is_empty());
    }

    #[test]
    fn size_and_flags() {
        let (config, rest) = parse(&[
            "--width",
            "1920",
            "--height",
            "1080",
            "--no-validation",
            "--fps",
            "60",
            "--log",
            "debug,prism_gpu=trace",
        ])
        .unwrap();

        assert_eq!((config.width, config.height), (1920, 1080));
        assert!(!config.validation);
        assert_eq!(config.target_fps, Some(60));
        assert_eq!(config.log_filter.as_deref(), Some("debug,prism_gpu=trace"));
        assert!(rest.is_empty());
    }

    #[test]
    fn last_validation_flag_wins() {
        let (config, _) = parse(&["--no-validation", "--validation"]).unwrap();
        assert!(config.validation);
    }

    #[test]
    fn unknown_args_are_passed_through() {
        let (config, rest) = parse(&["image.png", "--width", "800", "--nearest"]).unwrap();
        assert_eq!(config.width, 800);
        assert_eq!(rest, vec!["image.png".to_string(), "--nearest".to_string()]);
    }

    #[test]
    fn zero_fps_means_unlimited() {
        let (config, _) = AppConfig::new("test")
            .with_target_fps(30)
            .parse_args(["--fps", "0"])
            .unwrap();
        assert_eq!(config.target_fps, None);
    }

    #[test]
    fn bad_values_are_errors() {
        assert!(parse(&["--width"]).is_err());
        assert!(parse(&["--width", "wide"]).is_err());
        assert!(parse(&["--height", "0"]).is_err());
        assert!(parse(&["--fps", "-1"]).is_err());
        assert!(parse(&["--log"]).is_err());
    }

    #[test]
    fn builder_methods() {
        let config = AppConfig::new("viewer")
            .with_size(640, 480)
            .with_validation(true)
            .with_log_filter("warn");
        assert_eq!(config.title, "viewer");
        assert_eq!((config.width, config.height), (640, 480));
        assert!(config.validation);
        assert_eq!(config.log_filter.as_deref(), Some("warn"));
    }
}
