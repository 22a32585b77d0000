use std::{fmt, ops};

/// A set of readiness event kinds.
///
/// `Ready` doubles as a channel's *interest* mask (what to ask the kernel
/// for) and its *received* mask (what the kernel reported). Only
/// [`READABLE`], [`PRIORITY`] and [`WRITABLE`] are meaningful as interests;
/// [`ERROR`] and [`HUP`] are delivered by the kernel whether asked for or
/// not.
///
/// [`READABLE`]: Ready::READABLE
/// [`PRIORITY`]: Ready::PRIORITY
/// [`WRITABLE`]: Ready::WRITABLE
/// [`ERROR`]: Ready::ERROR
/// [`HUP`]: Ready::HUP
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Ready(u8);

const READABLE: u8 = 0b0_0001;
const WRITABLE: u8 = 0b0_0010;
const PRIORITY: u8 = 0b0_0100;
const ERROR: u8 = 0b0_1000;
const HUP: u8 = 0b1_0000;

impl Ready {
    /// The empty set. A channel whose interest mask is empty is
    /// deregistered from the kernel.
    pub const EMPTY: Ready = Ready(0);

    /// Readable readiness.
    pub const READABLE: Ready = Ready(READABLE);

    /// Writable readiness.
    pub const WRITABLE: Ready = Ready(WRITABLE);

    /// Urgent (out-of-band) readable readiness.
    pub const PRIORITY: Ready = Ready(PRIORITY);

    /// Error condition on the descriptor.
    pub const ERROR: Ready = Ready(ERROR);

    /// Hang-up: the peer closed its end.
    pub const HUP: Ready = Ready(HUP);

    /// Union of two sets, usable in constant position.
    pub const fn add(self, other: Ready) -> Ready {
        Ready(self.0 | other.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn is_readable(self) -> bool {
        self.0 & READABLE != 0
    }

    pub const fn is_writable(self) -> bool {
        self.0 & WRITABLE != 0
    }

    pub const fn is_priority(self) -> bool {
        self.0 & PRIORITY != 0
    }

    pub const fn is_error(self) -> bool {
        self.0 & ERROR != 0
    }

    pub const fn is_hup(self) -> bool {
        self.0 & HUP != 0
    }

    /// Returns true if every bit of `other` is present in `self`.
    pub const fn contains(self, other: Ready) -> bool {
        self.0 & other.0 == other.0
    }

    /// Removes every bit of `other` from `self`.
    pub fn remove(&mut self, other: Ready) {
        self.0 &= !other.0;
    }
}

impl ops::BitOr for Ready {
    type Output = Ready;

    #[inline]
    fn bitor(self, other: Ready) -> Ready {
        Ready(self.0 | other.0)
    }
}

impl ops::BitOrAssign for Ready {
    #[inline]
    fn bitor_assign(&mut self, other: Ready) {
        self.0 |= other.0;
    }
}

impl fmt::Debug for Ready {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(fmt, "(empty)");
        }
        let mut one = false;
        let mut flag = |fmt: &mut fmt::Formatter<'_>, name: &str| -> fmt::Result {
            if one {
                write!(fmt, " | ")?;
            }
            one = true;
            write!(fmt, "{}", name)
        };
        if self.is_readable() {
            flag(fmt, "READABLE")?;
        }
        if self.is_writable() {
            flag(fmt, "WRITABLE")?;
        }
        if self.is_priority() {
            flag(fmt, "PRIORITY")?;
        }
        if self.is_error() {
            flag(fmt, "ERROR")?;
        }
        if self.is_hup() {
            flag(fmt, "HUP")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Ready;

    #[test]
    fn bit_ops() {
        let mut r = Ready::READABLE | Ready::WRITABLE;
        assert!(r.is_readable());
        assert!(r.is_writable());
        assert!(r.contains(Ready::READABLE));
        assert!(!r.contains(Ready::READABLE | Ready::HUP));

        r.remove(Ready::READABLE);
        assert!(!r.is_readable());
        assert!(r.is_writable());

        r.remove(Ready::WRITABLE);
        assert!(r.is_empty());
        assert_eq!(r, Ready::EMPTY);
    }

    #[test]
    fn debug_names_every_bit() {
        let r = Ready::READABLE | Ready::ERROR | Ready::HUP;
        assert_eq!(format!("{:?}", r), "READABLE | ERROR | HUP");
        assert_eq!(format!("{:?}", Ready::EMPTY), "(empty)");
    }
}
