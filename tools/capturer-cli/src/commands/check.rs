//! Check system capabilities.

use std::path::Path;

use capturer_capture_engine::audio::{list_input_devices, select_input_device};
use capturer_capture_engine::encoder::gstreamer_encoder_available;
use capturer_capture_engine::region::{detect_monitors, virtual_desktop_bounds};
use capturer_common::config::AppConfig;
use capturer_render_engine::command_exists;

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("Capturer System Check");
    println!("{}", "=".repeat(50));

    let mut required_ok = true;

    for binary in ["ffmpeg", "ffprobe"] {
        if command_exists(Path::new(binary)) {
            println!("[OK] {binary} found");
        } else {
            required_ok = false;
            println!("[FAIL] {binary} not found on PATH (needed to merge recordings)");
        }
    }

    if gstreamer_encoder_available() {
        println!("[OK] GStreamer x264 encoder available");
    } else {
        println!("[WARN] GStreamer x264 encoder missing; use --intermediate y4m");
    }

    match detect_monitors() {
        Ok(monitors) => {
            println!("[OK] Monitors detected: {}", monitors.len());
            for m in &monitors {
                println!(
                    "     {} {}x{} at ({},{}) (scale: {}x) {}",
                    m.name,
                    m.width,
                    m.height,
                    m.x,
                    m.y,
                    m.scale_factor,
                    if m.primary { "(primary)" } else { "" }
                );
            }
            if let Some(desktop) = virtual_desktop_bounds(&monitors) {
                println!(
                    "     Desktop: {}x{} at ({},{})",
                    desktop.width, desktop.height, desktop.x, desktop.y
                );
            }
        }
        Err(e) => {
            required_ok = false;
            println!("[FAIL] Screen capture unavailable: {e}");
        }
    }

    match list_input_devices() {
        Ok(devices) if devices.is_empty() => {
            println!("[WARN] No audio input devices; recordings will be silent");
        }
        Ok(devices) => {
            println!("[OK] Audio input devices: {}", devices.len());
            let selected = select_input_device(&devices, std::env::consts::OS);
            for (index, device) in devices.iter().enumerate() {
                println!(
                    "     {} ({} channels) {}",
                    device.name,
                    device.max_input_channels,
                    if selected == Some(index) { "(selected)" } else { "" }
                );
            }
        }
        Err(e) => println!("[WARN] Audio devices unavailable: {e}"),
    }

    println!();
    println!("Output directory: {}", config.output_dir.display());
    println!("Session directory: {}", config.recording.temp_dir.display());

    println!();
    if required_ok {
        println!("All required capabilities are available. Capturer is ready.");
    } else {
        println!("Some required capabilities are missing. See above for fixes.");
    }

    Ok(())
}
