use std::fmt::Display;

/// Defines a dense `usize`-backed index type.
macro_rules! index_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy, Hash)]
        pub struct $name(u32);

        impl $name {
            pub fn new(index: usize) -> Self {
                Self(u32::try_from(index).expect(concat!(stringify!($name), " overflow")))
            }

            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }
    };
}

index_type!(
    /// Virtual register. Unbounded, numbered per function.
    VReg,
    "%"
);
index_type!(BlockId, "bb");
index_type!(InstrId, "i");
index_type!(SlotId, "#");
index_type!(
    /// Node of the interference graph; equal to the liveness dense index.
    NodeId,
    "n"
);
index_type!(MoveId, "m");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(VReg::new(3).to_string(), "%3");
        assert_eq!(BlockId::new(0).to_string(), "bb0");
        assert_eq!(SlotId::new(12).to_string(), "#12");
        assert_eq!(NodeId::new(7).index(), 7);
    }
}
