//! Module `state`
//!
//! Defines `SessionState`, the server-side context a session tracks:
//! authentication, working directory, representation type, data connection
//! mode and advertised features.

use std::collections::HashSet;

use crate::transfer::TransferMode;

/// Server-side context of one session.
#[derive(Debug, Clone)]
pub struct SessionState {
    authenticated: bool,
    current_directory: String,
    transfer_mode: TransferMode,
    passive: bool,
    features: HashSet<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            authenticated: false,
            current_directory: "/".to_string(),
            transfer_mode: TransferMode::Binary,
            passive: true,
            features: HashSet::new(),
        }
    }
}

impl SessionState {
    /// Fresh state for a newly established connection.
    pub fn new(passive: bool) -> Self {
        Self {
            passive,
            ..Self::default()
        }
    }

    /// Forgets everything tied to the server connection.
    pub fn logout(&mut self) {
        self.authenticated = false;
        self.features.clear();
    }

    // --------------------
    // Getter methods
    // --------------------

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Remote working directory as last confirmed by the server.
    pub fn current_directory(&self) -> &str {
        &self.current_directory
    }

    pub fn transfer_mode(&self) -> TransferMode {
        self.transfer_mode
    }

    /// Whether data connections are negotiated in passive mode.
    pub fn is_passive(&self) -> bool {
        self.passive
    }

    /// Whether the server advertised `feature` (case-insensitive) in `FEAT`.
    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.contains(&feature.to_ascii_uppercase())
    }

    // --------------------
    // Setter methods
    // --------------------

    pub fn set_authenticated(&mut self, authenticated: bool) {
        self.authenticated = authenticated;
    }

    pub fn set_current_directory(&mut self, path: String) {
        self.current_directory = path;
    }

    pub fn set_transfer_mode(&mut self, mode: TransferMode) {
        self.transfer_mode = mode;
    }

    pub fn set_passive(&mut self, passive: bool) {
        self.passive = passive;
    }

    /// Records the features from a `211` FEAT reply body.
    ///
    /// Feature lines are the ones indented by a space (RFC 2389).
    pub fn set_features<'a>(&mut self, lines: impl IntoIterator<Item = &'a str>) {
        self.features = lines
            .into_iter()
            .filter(|line| line.starts_with(' '))
            .filter_map(|line| line.split_whitespace().next())
            .map(|name| name.to_ascii_uppercase())
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn features_are_case_insensitive_names() {
        let mut state = SessionState::default();
        state.set_features(["Features:", " MLSD", " mdtm", " REST STREAM", " SIZE", "End"]);
        assert!(state.has_feature("mlsd"));
        assert!(state.has_feature("MDTM"));
        assert!(state.has_feature("REST"));
        assert!(!state.has_feature("MFMT"));
        assert!(!state.has_feature("END"));
    }

    #[test]
    fn logout_keeps_directory_but_drops_features() {
        let mut state = SessionState::new(false);
        state.set_authenticated(true);
        state.set_current_directory("/pub".into());
        state.set_features([" MLSD"]);
        state.logout();
        assert!(!state.is_authenticated());
        assert!(!state.has_feature("MLSD"));
        assert_eq!(state.current_directory(), "/pub");
        assert!(!state.is_passive());
    }
}
