//! Cross-thread identity for provider and module definitions.
//!
//! In-memory identity (a `TypeId`, an `Arc` pointer) is meaningless once a call
//! crosses into a worker that starts with no instances of its own. A
//! [`TokenId`] names a definition by where it was declared and under which
//! exported name, so the worker can look the same definition up again.
//!
//! Tokens are fixed at declaration time through [`declare_token!`], which
//! captures `module_path!()` at the call site. Nothing is recomputed at runtime.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Serializable locator for a provider or module definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenId {
    /// Module path of the declaring source (e.g. `my_app::services::pi`).
    pub origin: String,
    /// Name the definition is exported under within `origin`.
    pub export_name: String,
}

impl TokenId {
    /// Creates a token from an explicit origin and export name.
    #[must_use]
    pub fn new(origin: impl Into<String>, export_name: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            export_name: export_name.into(),
        }
    }

    /// Returns `false` when either half of the locator is missing.
    ///
    /// Unresolvable tokens are rejected when a catalog is built.
    #[must_use]
    pub fn is_resolvable(&self) -> bool {
        !self.origin.trim().is_empty() && !self.export_name.trim().is_empty()
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.origin, self.export_name)
    }
}

/// Types that carry a stable [`TokenId`].
///
/// Usually implemented through [`declare_token!`].
pub trait Token {
    fn token_id() -> TokenId;
}

/// Implements [`Token`] for a type using the invoking module's path.
///
/// ```
/// use offload_core::{declare_token, Token};
///
/// struct PiService;
/// declare_token!(PiService);
///
/// let token = PiService::token_id();
/// assert_eq!(token.export_name, "PiService");
/// assert!(token.is_resolvable());
/// ```
#[macro_export]
macro_rules! declare_token {
    ($ty:ident) => {
        impl $crate::Token for $ty {
            fn token_id() -> $crate::TokenId {
                $crate::TokenId::new(module_path!(), stringify!($ty))
            }
        }
    };
    ($ty:ident, $name:literal) => {
        impl $crate::Token for $ty {
            fn token_id() -> $crate::TokenId {
                $crate::TokenId::new(module_path!(), $name)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SampleModule;
    declare_token!(SampleModule);

    struct Renamed;
    declare_token!(Renamed, "PublicName");

    #[test]
    fn macro_captures_module_path_and_name() {
        let token = SampleModule::token_id();
        assert_eq!(token.origin, module_path!());
        assert_eq!(token.export_name, "SampleModule");
    }

    #[test]
    fn macro_accepts_explicit_export_name() {
        assert_eq!(Renamed::token_id().export_name, "PublicName");
    }

    #[test]
    fn token_is_stable_across_calls() {
        assert_eq!(SampleModule::token_id(), SampleModule::token_id());
    }

    #[test]
    fn empty_halves_are_unresolvable() {
        assert!(!TokenId::new("", "Pi").is_resolvable());
        assert!(!TokenId::new("app::pi", " ").is_resolvable());
        assert!(TokenId::new("app::pi", "Pi").is_resolvable());
    }

    #[test]
    fn display_joins_origin_and_name() {
        let token = TokenId::new("app::pi", "PiService");
        assert_eq!(token.to_string(), "app::pi::PiService");
    }

    #[test]
    fn msgpack_uses_camel_case_fields() {
        let token = TokenId::new("app::pi", "PiService");
        let bytes = rmp_serde::to_vec_named(&token).expect("serialize");
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("exportName"));
        let decoded: TokenId = rmp_serde::from_slice(&bytes).expect("deserialize");
        assert_eq!(decoded, token);
    }
}
