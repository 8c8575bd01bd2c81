//! Shared fixtures for integration tests.
//!
//! Fake `ffmpeg`/`ffprobe` shell scripts stand in for the real tools so the
//! tests never depend on what is installed on the host.

#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Write an executable `/bin/sh` script named `name` into `dir`.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::OpenOptionsExt;

    let path = dir.join(name);
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o755)
        .open(&path)
        .expect("failed to create script");
    writeln!(file, "#!/bin/sh\n{body}").expect("failed to write script");
    file.sync_all().expect("failed to sync script");
    drop(file);
    path
}

/// Encoder that echoes each argument on its own line, then exits with `code`.
#[cfg(unix)]
pub fn fake_encoder(dir: &Path, code: i32) -> PathBuf {
    write_script(
        dir,
        "ffmpeg",
        &format!(
            "for a in \"$@\"; do printf '%s\\n' \"$a\"; done\necho 'fake encoder diagnostics' >&2\nexit {code}"
        ),
    )
}

/// Encoder that emits a little output and then blocks until killed.
#[cfg(unix)]
pub fn hanging_encoder(dir: &Path) -> PathBuf {
    write_script(dir, "ffmpeg", "echo started\nexec sleep 30")
}

/// Prober that reports a single video stream of `width`x`height`.
#[cfg(unix)]
pub fn fake_ffprobe(dir: &Path, width: u32, height: u32) -> PathBuf {
    let json = format!(
        r#"{{"streams":[{{"codec_type":"video","width":{width},"height":{height}}}],"format":{{"format_name":"matroska,webm","duration":"42.4","bit_rate":"3000000"}}}}"#
    );
    write_script(dir, "ffprobe", &format!("cat <<'EOF'\n{json}\nEOF"))
}

/// Write a config file pointing both tools at the given paths.
pub fn write_config(dir: &Path, ffmpeg: &Path, ffprobe: &Path) -> PathBuf {
    let config = serde_json::json!({
        "tools": {
            "ffmpeg_path": ffmpeg,
            "ffprobe_path": ffprobe,
        },
        "transcode": {
            "max_encode_secs": 30,
            "kill_grace_ms": 500,
        },
    });
    let path = dir.join("reelcast.json");
    fs::write(&path, serde_json::to_string_pretty(&config).expect("serialize config"))
        .expect("failed to write config");
    path
}

/// Create a stand-in media file with the given contents.
pub fn write_media(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("failed to write media file");
    path
}
