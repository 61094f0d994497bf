//! Compile-time app configuration
//!
//! All values are baked at build time from app.config.json.

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

// App identifier for OS (e.g., "cn.haodeyun.clouddesktop")
baked_config!(app_identifier, "CLOUD_DESKTOP_APP_IDENTIFIER");

// REST backend the UI talks to (e.g., "https://yun.haodeyun.cn")
baked_config!(api_base_url, "CLOUD_DESKTOP_API_URL");
