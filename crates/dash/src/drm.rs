use std::collections::HashMap;

use crate::manifest::{AdaptationSet, MediaType, ProtectionDescriptor};

pub const MP4_PROTECTION_SCHEME: &str = "urn:mpeg:dash:mp4protection:2011";
pub const WIDEVINE_SCHEME_ID_URI: &str = "urn:uuid:edef8ba9-79d6-4ace-a3c8-27dcd51d21ed";
pub const PLAYREADY_SCHEME_ID_URI: &str = "urn:uuid:9a04f079-9840-4286-ab92-e65be0885f95";
pub const CLEARKEY_SCHEME_ID_URI: &str = "urn:uuid:e2719d58-a985-b3c9-781a-b030af78d30e";

/// Key system session prepared for one protected track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrmHelper {
    pub scheme_id_uri: String,
    pub default_kid: Option<String>,
    /// Raw `ContentProtection@value`.
    pub value: Option<String>,
}

/// Licence acquisition lives outside this crate. The collaborator only decides whether a
/// track is protected and prepares a helper for a protection descriptor.
pub trait DrmCollaborator: Send + Sync + 'static {
    fn has_protection(&self, adaptation_set: &AdaptationSet) -> bool;

    /// Called at most once per distinct descriptor and track.
    fn create_helper(&self, descriptor: &ProtectionDescriptor) -> Option<DrmHelper>;
}

impl<D> DrmCollaborator for std::sync::Arc<D>
where
    D: DrmCollaborator,
{
    fn has_protection(&self, adaptation_set: &AdaptationSet) -> bool {
        self.as_ref().has_protection(adaptation_set)
    }

    fn create_helper(&self, descriptor: &ProtectionDescriptor) -> Option<DrmHelper> {
        self.as_ref().create_helper(descriptor)
    }
}

/// Accepts the key systems it was built with.
#[derive(Debug, Clone)]
pub struct KeySystemDrm {
    systems: Vec<String>,
}

impl Default for KeySystemDrm {
    fn default() -> Self {
        Self::new([
            WIDEVINE_SCHEME_ID_URI,
            PLAYREADY_SCHEME_ID_URI,
            CLEARKEY_SCHEME_ID_URI,
        ])
    }
}

impl KeySystemDrm {
    pub fn new<S: Into<String>>(systems: impl IntoIterator<Item = S>) -> Self {
        Self {
            systems: systems
                .into_iter()
                .map(|s| s.into().to_ascii_lowercase())
                .collect(),
        }
    }
}

impl DrmCollaborator for KeySystemDrm {
    fn has_protection(&self, adaptation_set: &AdaptationSet) -> bool {
        adaptation_set.is_protected()
    }

    fn create_helper(&self, descriptor: &ProtectionDescriptor) -> Option<DrmHelper> {
        let scheme = descriptor.scheme_id_uri.to_ascii_lowercase();
        if !self.systems.contains(&scheme) {
            return None;
        }
        Some(DrmHelper {
            scheme_id_uri: scheme,
            default_kid: descriptor.default_kid.clone(),
            value: descriptor.value.clone(),
        })
    }
}

/// Remembers the descriptor each track's helper was created from.
#[derive(Debug, Default)]
pub struct DrmSessionTracker {
    last: HashMap<MediaType, ProtectionDescriptor>,
}

impl DrmSessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepare a helper for the selected representation of `adaptation_set`.
    ///
    /// Returns `None` for clear content, for key systems the collaborator rejects, and when the
    /// protection is unchanged since the previous call for this track.
    pub fn acquire(
        &mut self,
        drm: &impl DrmCollaborator,
        media_type: MediaType,
        adaptation_set: &AdaptationSet,
        representation_index: usize,
    ) -> Option<DrmHelper> {
        if !drm.has_protection(adaptation_set) {
            return None;
        }

        let representation = adaptation_set.representations.get(representation_index);
        let descriptors: Vec<&ProtectionDescriptor> = adaptation_set
            .content_protection
            .iter()
            .chain(representation.into_iter().flat_map(|r| &r.content_protection))
            .collect();
        // the generic descriptor carries the key id shared by every key system
        let default_kid = descriptors
            .iter()
            .find(|d| d.scheme_id_uri.eq_ignore_ascii_case(MP4_PROTECTION_SCHEME))
            .and_then(|d| d.default_kid.clone());

        for descriptor in descriptors
            .into_iter()
            .filter(|d| !d.scheme_id_uri.eq_ignore_ascii_case(MP4_PROTECTION_SCHEME))
        {
            let mut descriptor = descriptor.clone();
            if descriptor.default_kid.is_none() {
                descriptor.default_kid = default_kid.clone();
            }

            if self.last.get(&media_type) == Some(&descriptor) {
                tracing::debug!(?media_type, scheme = %descriptor.scheme_id_uri, "protection unchanged, reusing session");
                return None;
            }
            if let Some(helper) = drm.create_helper(&descriptor) {
                tracing::info!(
                    ?media_type,
                    scheme = %helper.scheme_id_uri,
                    default_kid = ?helper.default_kid,
                    "created drm helper"
                );
                self.last.insert(media_type, descriptor);
                return Some(helper);
            }
        }

        tracing::warn!(?media_type, "no supported key system for protected track");
        None
    }

    pub fn reset(&mut self) {
        self.last.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Representation;

    fn protected(kid: &str) -> AdaptationSet {
        AdaptationSet {
            content_protection: vec![
                ProtectionDescriptor {
                    scheme_id_uri: MP4_PROTECTION_SCHEME.to_string(),
                    value: Some("cenc".to_string()),
                    default_kid: Some(kid.to_string()),
                },
                ProtectionDescriptor {
                    scheme_id_uri: "urn:uuid:00000000-0000-0000-0000-000000000000".to_string(),
                    ..Default::default()
                },
                ProtectionDescriptor {
                    scheme_id_uri: WIDEVINE_SCHEME_ID_URI.to_uppercase(),
                    ..Default::default()
                },
            ],
            representations: vec![Representation::default()],
            ..Default::default()
        }
    }

    #[test]
    fn test_helper_created_once() {
        let drm = KeySystemDrm::default();
        let mut tracker = DrmSessionTracker::new();
        let adaptation_set = protected("kid-1");

        let helper = tracker
            .acquire(&drm, MediaType::Video, &adaptation_set, 0)
            .unwrap();
        assert_eq!(helper.scheme_id_uri, WIDEVINE_SCHEME_ID_URI);
        assert_eq!(helper.default_kid.as_deref(), Some("kid-1"));

        // unchanged protection, e.g. after a profile switch
        assert!(tracker
            .acquire(&drm, MediaType::Video, &adaptation_set, 0)
            .is_none());
        // other tracks keep their own sessions
        assert!(tracker
            .acquire(&drm, MediaType::Audio, &adaptation_set, 0)
            .is_some());
        // new key in the next period
        assert!(tracker
            .acquire(&drm, MediaType::Video, &protected("kid-2"), 0)
            .is_some());
    }

    #[test]
    fn test_clear_and_unsupported() {
        let drm = KeySystemDrm::new([CLEARKEY_SCHEME_ID_URI]);
        let mut tracker = DrmSessionTracker::new();

        assert!(tracker
            .acquire(&drm, MediaType::Video, &AdaptationSet::default(), 0)
            .is_none());
        assert!(tracker
            .acquire(&drm, MediaType::Video, &protected("kid"), 0)
            .is_none());
    }
}
