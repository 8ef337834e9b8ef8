fn main() {
    // Exposes build metadata (git commit, version) via the built_info module.
    built::write_built_file().expect("Failed to acquire build-time information");
}
