//! Check encoder support.

use lapse_common::config::{config_file_path, AppConfig};
use lapse_media::{EncoderArgs, FileBackend, MediaBackend};

pub async fn run(
    codec: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    save: bool,
) -> anyhow::Result<()> {
    let mut app = AppConfig::load();
    let mut args = EncoderArgs::from_defaults(&app.encoder, fps.unwrap_or(app.time_lapse.fps));
    if let Some(codec) = codec {
        args.codec = codec;
    }
    if let Some(width) = width {
        args.width = width;
    }
    if let Some(height) = height {
        args.height = height;
    }

    println!("Lapse Encoder Check");
    println!("{}", "=".repeat(50));
    println!("Config file: {}", config_file_path().display());
    match app.time_lapse.validate() {
        Ok(()) => println!(
            "[OK] Time-lapse: {}s ceiling, starting at {}x",
            app.time_lapse.max_duration_secs, app.time_lapse.initial_speed
        ),
        Err(e) => println!("[WARN] Time-lapse config: {e}"),
    }

    let backend = FileBackend::new();
    println!("Backend: {}", backend.name());
    println!(
        "Requested: {} {}x{} @ {}fps, {} bps",
        args.codec, args.width, args.height, args.fps, args.bitrate
    );
    println!();

    if backend.is_config_supported(&args).await? {
        println!("[OK] Configuration is supported.");
        if save {
            app.encoder.codec = args.codec;
            app.encoder.width = args.width;
            app.encoder.height = args.height;
            app.time_lapse.fps = args.fps;
            app.save()?;
            println!("Saved to {}", config_file_path().display());
        }
        return Ok(());
    }

    let reason = FileBackend::unsupported_reason(&args).unwrap_or_default();
    println!("[FAIL] {reason}");
    anyhow::bail!("unsupported encoder configuration")
}
