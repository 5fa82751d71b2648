use kernel_info::memory;
use std::{env, path::PathBuf};

fn main() {
    // Point to the linker script
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let ld = manifest_dir.join("kernel.ld");

    // Sanity checks (fail fast during build)
    let kernel_phys = memory::KERNEL_PHYS;
    let kernel_virt = memory::KERNEL_VIRT;
    let offset = memory::KERNEL_VIRT_OFFSET;
    assert_eq!(
        kernel_phys & 0xfff,
        0,
        "KERNEL_PHYS must be 4 KiB aligned (got {kernel_phys:#x})"
    );
    assert_eq!(
        offset & ((1u32 << 22) - 1),
        0,
        "KERNEL_VIRT_OFFSET must be 4 MiB aligned (got {offset:#x})"
    );
    assert_eq!(kernel_virt, kernel_phys + offset);

    // Rebuild when inputs change
    println!("cargo:rerun-if-changed={}", ld.display());

    // Hosted builds (unit tests) use the platform linker defaults.
    if env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("none") {
        return;
    }

    // Linker script
    println!("cargo:rustc-link-arg-bins=-T{}", ld.display());

    // Provide symbols to the linker script
    // (cargo:rustc-link-arg-bins passes args directly to the linker)
    println!("cargo:rustc-link-arg-bins=--defsym=KERNEL_PHYS={kernel_phys:#x}");
    println!("cargo:rustc-link-arg-bins=--defsym=KERNEL_VIRT_OFFSET={offset:#x}");
}
