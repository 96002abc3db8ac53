//! Show artifact information.

use std::path::PathBuf;

use lapse_media::container::read_artifact;

pub fn run(path: PathBuf, json: bool) -> anyhow::Result<()> {
    let info =
        read_artifact(&path).map_err(|e| anyhow::anyhow!("Failed to read artifact: {e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info.header)?);
        return Ok(());
    }

    let h = &info.header;
    println!("Artifact: {}", path.display());
    println!("  Created: {}", h.created_at);
    println!("  Codec: {}", h.codec);
    println!(
        "  Resolution: {}x{} (rotation {}°)",
        h.width,
        h.height,
        h.rotation.degrees()
    );
    println!();

    println!("Time-lapse:");
    println!("  Speed: {}x", h.speed);
    println!("  Frames: {} ({} key frames)", info.frame_count(), info.key_frames);
    println!("  Duration: {:.2}s @ {}fps", info.duration_secs(), h.fps);
    if let (Some(first), Some(last)) = (info.frame_numbers.first(), info.frame_numbers.last()) {
        println!("  Source frames: {first}..={last}");
    }
    println!("  Payload: {} bytes", info.payload_bytes);

    Ok(())
}
