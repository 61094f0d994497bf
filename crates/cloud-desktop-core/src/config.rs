//! Compile-time app configuration
//!
//! All values are baked at build time from app.config.json.
//! Mirrors the shell config.rs for the subset needed by Desktop Core.

macro_rules! baked_config {
    ($name:ident, $env:literal) => {
        pub fn $name() -> &'static str {
            option_env!($env).expect(concat!(
                $env,
                " not baked at build time. Check build.rs and app.config.json"
            ))
        }
    };
}

// App display name (e.g., "Cloud Desktop")
baked_config!(app_name, "CLOUD_DESKTOP_APP_NAME");

// App slug for machine use (e.g., "cloud-desktop")
baked_config!(app_slug, "CLOUD_DESKTOP_APP_SLUG");

// Home folder name (e.g., ".cloud-desktop")
baked_config!(home_folder, "CLOUD_DESKTOP_HOME_FOLDER");

// REST backend the UI talks to through the relay (e.g., "https://yun.haodeyun.cn")
baked_config!(api_base_url, "CLOUD_DESKTOP_API_URL");
