
fn main() {
    feature_conflicts();

    let version = get_version();
    println!("cargo:rustc-env=VERSION={}", version);

    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_GPIO");
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src/database/schema.sql");
}

fn feature_conflicts() {

    // Database.
    if !cfg!(feature = "db-sqlite") {
        panic!("At least one database backend feature must be enabled!");
    }

    // GPIO.
    if !cfg!(feature = "gpio") {
        println!("cargo:warning=GPIO feature disabled, status LEDs will only be logged.");
    }
}

fn get_version() -> String {
    let mut suffixes = Vec::new();
    if cfg!(feature = "gpio") {
        suffixes.push("gpio");
    }

    let version = env!("CARGO_PKG_VERSION");
    if suffixes.is_empty() {
        version.to_string()
    } else {
        format!("{}+{}", version, suffixes.join("."))
    }
}
