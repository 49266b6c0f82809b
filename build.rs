fn main() {
    // Prefer explicit PROXY_CORE_VERSION, then CI tag, then Cargo package version
    let version = std::env::var("PROXY_CORE_VERSION")
        .or_else(|_| std::env::var("GITHUB_REF_NAME"))
        .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string());

    println!("cargo:rustc-env=PROXY_CORE_VERSION={}", version);
}
