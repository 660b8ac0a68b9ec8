use std::fmt;

/// Declares a newtype wrapper around the row id of one of the four tables,
/// so that a `LayerId` can never be passed where a `FileId` is expected.
macro_rules! id_type {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub i64);

        impl $name {
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                $name(value)
            }
        }
    };
}

id_type!(FileId);
id_type!(LayerId);
id_type!(VersionId);
id_type!(ChunkId);
