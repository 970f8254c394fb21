// Compiles the per-architecture context-switch routine and links it as a
// static library, the same approach the coroutine-rs lineage uses (there
// via the now-defunct `gcc` crate; here via its maintained successor `cc`).

fn main() {
    let target_arch = std::env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();

    match target_arch.as_str() {
        "x86_64" => {
            println!("cargo:rerun-if-changed=src/asm/x86_64/swap.S");
            cc::Build::new()
                .file("src/asm/x86_64/swap.S")
                .compile("ctxswtch");
        }
        other => {
            // No asm backend for this architecture yet; src/arch falls back
            // to a compile_error! so the failure is explicit at build time
            // instead of silently producing a broken runtime.
            println!("cargo:warning=coro-rt has no context-switch backend for target_arch=\"{other}\"");
        }
    }
}
