//! Stamps the binary with the time it was built; `main` logs it at startup.

fn main() {
    let built = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
    println!("cargo:rustc-env=BUILD_DATE={}", built);
    println!("cargo:rerun-if-changed=build.rs");
}
