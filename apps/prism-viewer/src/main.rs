//! Prism image viewer
//!
//! Shows one image scaled to fit the window, centred over a background colour.
//! Supports LDR images and float HDR images (Radiance `.hdr`, OpenEXR).
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p prism-viewer -- [IMAGE] [OPTIONS]
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;
mod fit;
mod options;
mod pixels;

use prism_app::{run_app, AppConfig};

use crate::app::Viewer;
use crate::options::ViewerOptions;

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;
const TARGET_FPS: u32 = 60;

fn main() -> anyhow::Result<()> {
    // Check for help flag before starting the app
    if std::env::args().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    let (config, rest) = AppConfig::new("Prism Viewer")
        .with_size(WIDTH, HEIGHT)
        .with_target_fps(TARGET_FPS)
        .from_args()?;
    let options = ViewerOptions::parse(rest)?;

    if let Some(path) = &options.image {
        if !path.is_file() {
            anyhow::bail!("No such image: {}", path.display());
        }
    }

    run_app::<Viewer>(config)
}

fn print_help() {
    eprintln!(
        "Prism image viewer

USAGE:
    cargo run -p prism-viewer -- [IMAGE] [OPTIONS]

VIEWER OPTIONS:
    --background <R,G,B>    Background colour, channels in 0..1 (default: 0.1,0.1,0.12)
    --nearest               Nearest-neighbour filtering instead of linear
                            (float images fall back to nearest where linear is unsupported)

WINDOW OPTIONS:
    --width <N>             Window width (default: {WIDTH})
    --height <N>            Window height (default: {HEIGHT})
    --fps <N>               Frame rate cap, 0 for unlimited (default: {TARGET_FPS})
    --validation            Enable Vulkan validation layers
    --no-validation         Disable Vulkan validation layers
    --log <FILTER>          Log filter when RUST_LOG is unset (default: info)

OTHER:
    -h, --help              Print this help message

KEYS:
    Escape                  Quit

EXAMPLES:
    # Show a photo
    cargo run -p prism-viewer -- photo.jpg

    # HDR environment map
    cargo run -p prism-viewer -- studio.hdr

    # Pixel art on white, without smoothing
    cargo run -p prism-viewer -- sprite.png --nearest --background 1,1,1

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}
