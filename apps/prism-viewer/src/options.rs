//! Viewer-specific command line options.

use std::path::PathBuf;

use anyhow::{bail, Context};
use ash::vk;
use prism_app::AppConfig;

pub const DEFAULT_BACKGROUND: [f32; 3] = [0.1, 0.1, 0.12];

/// What to show and how.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewerOptions {
    /// Image to display; only the background is drawn without one.
    pub image: Option<PathBuf>,
    /// Linear RGB clear colour, each channel in `[0, 1]`.
    pub background: [f32; 3],
    pub filter: vk::Filter,
}

impl Default for ViewerOptions {
    fn default() -> Self {
        Self {
            image: None,
            background: DEFAULT_BACKGROUND,
            filter: vk::Filter::LINEAR,
        }
    }
}

impl ViewerOptions {
    /// Read the options from the process arguments, skipping the window
    /// flags `AppConfig` handles.
    pub fn from_args() -> anyhow::Result<Self> {
        let (_, rest) = AppConfig::default().from_args()?;
        Self::parse(rest)
    }

    /// Parse the arguments left over after the application flags.
    pub fn parse<I>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut options = Self::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--background" => {
                    let value = args.next().context("--background needs R,G,B")?;
                    options.background = parse_color(&value)?;
                }
                "--nearest" => options.filter = vk::Filter::NEAREST,
                flag if flag.starts_with('-') => bail!("Unknown option: {flag}"),
                _ if options.image.is_some() => bail!("Only one image can be shown: {arg}"),
                _ => options.image = Some(PathBuf::from(arg)),
            }
        }

        Ok(options)
    }
}

/// Parse `R,G,B` with each channel in `[0, 1]`.
pub fn parse_color(value: &str) -> anyhow::Result<[f32; 3]> {
    let channels = value
        .split(',')
        .map(|c| {
            c.trim()
                .parse::<f32>()
                .with_context(|| format!("Invalid colour channel {c:?}"))
        })
        .collect::<anyhow::Result<Vec<f32>>>()?;

    let [r, g, b] = channels[..] else {
        bail!("Expected three channels, got {value:?}");
    };

    if [r, g, b].iter().any(|c| !(0.0..=1.0).contains(c)) {
        bail!("Colour channels must be between 0 and 1: {value:?}");
    }
    Ok([r, g, b])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn parse(args: &[&str]) -> anyhow::Result<ViewerOptions> {
        ViewerOptions::parse(args.iter().map(|s| (*s).to_string()))
    }

    #[test]
    fn window_flags_are_left_to_app_config() {
        let (config, rest) = AppConfig::default()
            .parse_args(["photo.exr", "--width", "640", "--nearest"])
            .unwrap();
        assert_eq!(config.width, 640);

        let options = ViewerOptions::parse(rest).unwrap();
        assert_eq!(options.image, Some(PathBuf::from("photo.exr")));
        assert_eq!(options.filter, vk::Filter::NEAREST);
    }

    #[test]
    fn defaults_without_args() {
        assert_eq!(parse(&[]).unwrap(), ViewerOptions::default());
    }

    #[test]
    fn image_background_and_filter() {
        let options = parse(&["photo.jpg", "--background", "1, 0.5,0", "--nearest"]).unwrap();
        assert_eq!(options.image, Some(PathBuf::from("photo.jpg")));
        assert_relative_eq!(options.background[0], 1.0);
        assert_relative_eq!(options.background[1], 0.5);
        assert_relative_eq!(options.background[2], 0.0);
        assert_eq!(options.filter, vk::Filter::NEAREST);
    }

    #[test]
    fn malformed_colours_are_rejected() {
        assert!(parse_color("1,0").is_err());
        assert!(parse_color("1,0,0,1").is_err());
        assert!(parse_color("red,0,0").is_err());
        assert!(parse_color("2,0,0").is_err());
        assert!(parse_color("-0.1,0,0").is_err());
    }

    #[test]
    fn unknown_flags_and_extra_images_are_errors() {
        assert!(parse(&["--zoom"]).is_err());
        assert!(parse(&["a.png", "b.png"]).is_err());
        assert!(parse(&["--background"]).is_err());
    }
}
