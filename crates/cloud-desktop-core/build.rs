use std::fs;

fn main() {
    // Read app.config.json (same source as the shell build.rs)
    // Walk up from crates/cloud-desktop-core/ to the app root
    let config_path = "../../app.config.json";
    println!("cargo:rerun-if-changed={}", config_path);

    let config_str = fs::read_to_string(config_path).unwrap_or_else(|_| {
        panic!(
            "\n\nBUILD ERROR: app.config.json not found at {}\n\
             Desktop Core must be built from within the cloud-desktop-app tree.\n\n",
            config_path
        )
    });

    let config: serde_json::Value = serde_json::from_str(&config_str).unwrap_or_else(|e| {
        panic!("\n\nBUILD ERROR: Invalid app.config.json: {}\n\n", e)
    });

    let app = config.get("app").expect("app.config.json missing 'app' section");
    let storage = config.get("storage").expect("app.config.json missing 'storage' section");
    let api = config.get("api").expect("app.config.json missing 'api' section");

    let app_name = app.get("name").and_then(|v| v.as_str())
        .expect("app.config.json: app.name is required");
    let app_slug = app.get("slug").and_then(|v| v.as_str())
        .expect("app.config.json: app.slug is required");
    let home_folder = storage.get("homeFolderName").and_then(|v| v.as_str())
        .expect("app.config.json: storage.homeFolderName is required");
    let api_base_url = api.get("baseUrl").and_then(|v| v.as_str())
        .expect("app.config.json: api.baseUrl is required");

    if home_folder.is_empty() {
        panic!("\n\nBUILD ERROR: storage.homeFolderName cannot be empty in app.config.json\n\n");
    }

    // Bake identical values as the shell build.rs
    println!("cargo:rustc-env=CLOUD_DESKTOP_APP_NAME={}", app_name);
    println!("cargo:rustc-env=CLOUD_DESKTOP_APP_SLUG={}", app_slug);
    println!("cargo:rustc-env=CLOUD_DESKTOP_HOME_FOLDER={}", home_folder);
    println!("cargo:rustc-env=CLOUD_DESKTOP_API_URL={}", api_base_url);
}
