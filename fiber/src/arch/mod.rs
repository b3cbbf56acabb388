cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        mod x86_64;
        pub use self::x86_64::{init_stack, switch, STACK_ALIGNMENT};
    } else if #[cfg(target_arch = "aarch64")] {
        mod aarch64;
        pub use self::aarch64::{init_stack, switch, STACK_ALIGNMENT};
    } else {
        compile_error!("reactor-fiber: unsupported target architecture");
    }
}
