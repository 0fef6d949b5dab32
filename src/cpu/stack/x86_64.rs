//! x86-64 (System V) stack switch and work-item bootstrap.
//!
//! `clrun_stack_switch` pushes the callee-saved registers, publishes the
//! resulting stack pointer through the save slot, then restores the
//! context stored in the load slot. Seeding builds exactly the frame the
//! restore path expects: six zeroed register slots below a return address
//! pointing at the bootstrap shim, which aligns the stack and calls into
//! the common `clrun_work_item_main`.

core::arch::global_asm!(
    ".balign 16",
    ".globl clrun_stack_switch",
    "clrun_stack_switch:",
    "    push rbp",
    "    push rbx",
    "    push r12",
    "    push r13",
    "    push r14",
    "    push r15",
    "    mov [rdi], rsp",
    "    mov rsp, [rsi]",
    "    pop r15",
    "    pop r14",
    "    pop r13",
    "    pop r12",
    "    pop rbx",
    "    pop rbp",
    "    ret",
    ".balign 16",
    ".globl clrun_work_item_boot",
    "clrun_work_item_boot:",
    "    and rsp, -16",
    "    call {main}",
    "    ud2",
    main = sym super::clrun_work_item_main,
);

extern "C" {
    fn clrun_work_item_boot();
}

const SAVED_REGISTERS: usize = 6;

/// Seeds a fresh work-item stack whose page ends (exclusive) at `top`.
/// Returns the stack pointer to store in the frame table.
///
/// ## Safety
///
/// `top` must be the 16-byte-aligned exclusive end of at least one
/// writable page.
pub(super) unsafe fn seed_stack(top: *mut u8) -> *mut u8 {
    debug_assert_eq!(top as usize % 16, 0);

    let boot: unsafe extern "C" fn() = clrun_work_item_boot;

    let mut sp = top as *mut usize;
    sp = sp.sub(1);
    sp.write(boot as usize);
    sp = sp.sub(SAVED_REGISTERS);
    core::ptr::write_bytes(sp, 0, SAVED_REGISTERS);

    sp as *mut u8
}
