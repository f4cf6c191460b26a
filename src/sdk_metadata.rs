/// SDK metadata that is attached to assignment events and sent to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdkMetadata {
    /// SDK name. (Usually, language name.)
    pub name: &'static str,
    /// Version of SDK.
    pub version: &'static str,
}

impl SdkMetadata {
    /// Metadata describing this crate.
    pub const fn this_crate() -> SdkMetadata {
        SdkMetadata {
            name: "rust",
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

impl Default for SdkMetadata {
    fn default() -> SdkMetadata {
        SdkMetadata::this_crate()
    }
}
