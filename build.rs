use serde_json::Value;
use std::fs;

const CONFIG_FILE: &str = "app.config.json";

fn fail(message: String) -> ! {
    panic!("\n\nBUILD ERROR: {}\n\n", message)
}

/// Non-empty string at `section.key`
fn required<'a>(config: &'a Value, section: &str, key: &str) -> &'a str {
    match config.get(section).and_then(|s| s.get(key)).and_then(Value::as_str) {
        Some(value) if !value.trim().is_empty() => value,
        Some(_) => fail(format!("{}.{} cannot be empty in {}", section, key, CONFIG_FILE)),
        None => fail(format!("{}: {}.{} is required", CONFIG_FILE, section, key)),
    }
}

fn main() {
    println!("cargo:rerun-if-changed={}", CONFIG_FILE);

    let raw = fs::read_to_string(CONFIG_FILE)
        .unwrap_or_else(|_| fail(format!("{} not found next to Cargo.toml", CONFIG_FILE)));
    let config: Value = serde_json::from_str(&raw)
        .unwrap_or_else(|e| fail(format!("invalid {}: {}", CONFIG_FILE, e)));

    // The shell only needs display values; Core bakes its own storage settings
    let baked = [
        ("CLOUD_DESKTOP_APP_NAME", required(&config, "app", "name")),
        ("CLOUD_DESKTOP_APP_IDENTIFIER", required(&config, "app", "identifier")),
        ("CLOUD_DESKTOP_API_URL", required(&config, "api", "baseUrl")),
    ];
    for (env, value) in baked {
        println!("cargo:rustc-env={}={}", env, value);
    }

    tauri_build::build()
}
