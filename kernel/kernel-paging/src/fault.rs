//! Page-fault termination path.
//!
//! There is no demand paging, no copy-on-write and no swap: every page
//! fault means the kernel touched memory it never mapped, so the only
//! response is a panic carrying the captured register state.

use core::fmt;

use kernel_addresses::VirtAddr;

/// Register state captured by the page-fault interrupt stub.
///
/// Layout matches what a `pushad`-style stub leaves on the stack, followed
/// by the CPU-pushed error code and return frame; CR2 is read separately
/// by the stub and stored alongside.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct FaultFrame {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    /// Hardware error code pushed by the CPU.
    pub error_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    /// The faulting linear address, read from CR2.
    pub cr2: u32,
}

impl FaultFrame {
    /// The address whose translation faulted.
    #[inline]
    #[must_use]
    pub const fn faulting_address(&self) -> VirtAddr {
        VirtAddr::new(self.cr2)
    }
}

/// Human-readable decode of the hardware error code.
struct ErrorCode(u32);

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cause = if self.0 & 1 != 0 {
            "protection violation"
        } else {
            "page not present"
        };
        let access = if self.0 & 2 != 0 { "write" } else { "read" };
        let mode = if self.0 & 4 != 0 { "user" } else { "kernel" };
        write!(f, "{cause} on {access} from {mode} mode")?;
        if self.0 & 16 != 0 {
            write!(f, " (instruction fetch)")?;
        }
        Ok(())
    }
}

/// The page-fault handler. Never returns.
///
/// # Panics
/// Always; a fault is unrecoverable in this kernel.
pub fn page_fault(frame: &FaultFrame) -> ! {
    panic!(
        "page fault at {} ({}), eip {:#010x}, error code {:#x}",
        frame.faulting_address(),
        ErrorCode(frame.error_code),
        frame.eip,
        frame.error_code
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(error_code: u32, cr2: u32) -> FaultFrame {
        FaultFrame {
            edi: 0,
            esi: 0,
            ebp: 0,
            esp: 0,
            ebx: 0,
            edx: 0,
            ecx: 0,
            eax: 0,
            error_code,
            eip: 0xC010_1234,
            cs: 0x08,
            eflags: 0x202,
            cr2,
        }
    }

    #[test]
    #[should_panic(expected = "page fault at 0xdeadb000")]
    fn fault_is_fatal() {
        page_fault(&frame(0, 0xDEAD_B000));
    }

    #[test]
    #[should_panic(expected = "page not present on write from kernel mode")]
    fn error_code_is_decoded() {
        page_fault(&frame(2, 0x1000));
    }
}
