//! Records exchanged with the relational store and the HTTP layer, plus query-string
//! parsing shared by every listing endpoint.

/// Integer-backed enum serialized as its discriminant.
macro_rules! int_enum {
    ($name:ident { $($variant:ident = $value:expr),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_i64(&self) -> i64 {
                match self {
                    $($name::$variant => $value),+
                }
            }

            pub fn from_i64(value: i64) -> Option<Self> {
                match value {
                    $(v if v == $value => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_i64(self.as_i64())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let value = i64::deserialize(deserializer)?;
                $name::from_i64(value).ok_or_else(|| {
                    serde::de::Error::custom(format!("invalid {} value: {}", stringify!($name), value))
                })
            }
        }
    };
}

pub mod analysis;
pub mod assetgrouptags;
pub mod audit;
pub mod dataquality;
pub mod filter;
pub mod ingest;
pub mod params;
pub mod response;
pub mod savedqueries;
pub mod user;
