use std::fmt;

use serde::Serialize;

use super::{AdaptationSet, Representation};

/// `EssentialProperty@schemeIdUri` marking an iframe-only adaptation set.
pub const TRICKMODE_SCHEME: &str = "http://dashif.org/guidelines/trickmode";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum MediaType {
    Video,
    Audio,
    Subtitle,
    AuxAudio,
    /// Iframe-only video used during trick-play.
    Iframe,
}

impl MediaType {
    /// Tracks enabled at normal play rate, in selection order.
    pub const PLAYBACK_TRACKS: [MediaType; 4] = [
        MediaType::Video,
        MediaType::Audio,
        MediaType::Subtitle,
        MediaType::AuxAudio,
    ];

    /// `AdaptationSet@contentType` value of this media type.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Video | Self::Iframe => "video",
            Self::Audio | Self::AuxAudio => "audio",
            Self::Subtitle => "text",
        }
    }

    fn is_compatible_mime_type(&self, mime_type: &str, codecs: Option<&str>) -> bool {
        match self {
            Self::Video | Self::Iframe => mime_type == "video/mp4",
            Self::Audio | Self::AuxAudio => mime_type == "audio/mp4" || mime_type == "audio/webm",
            Self::Subtitle => match mime_type {
                "text/vtt" | "application/ttml+xml" => true,
                "application/mp4" => {
                    codecs.is_some_and(|c| c.starts_with("stpp") || c.starts_with("wvtt"))
                }
                _ => false,
            },
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Subtitle => "subtitle",
            Self::AuxAudio => "aux-audio",
            Self::Iframe => "iframe",
        };
        f.write_str(name)
    }
}

/// Audio codec families ordered by selection priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum AudioCodec {
    /// Nothing selected yet.
    #[default]
    Unknown,
    Aac,
    DdPlus,
    Atmos,
}

impl AudioCodec {
    pub fn from_codecs(codecs: Option<&str>) -> Self {
        match codecs {
            Some("ec+3") => Self::Atmos,
            Some("ec-3") => Self::DdPlus,
            _ => Self::Aac,
        }
    }
}

impl AdaptationSet {
    /// Whether this adaptation set carries `media_type`.
    ///
    /// `@contentType` decides when present; muxed content is never selected. Otherwise the mime
    /// types of the set and its representations, then `ContentComponent`s, are inspected.
    pub fn is_content_type(&self, media_type: MediaType) -> bool {
        let name = media_type.content_type();
        match self.content_type.as_deref() {
            Some(content_type) if content_type == name => return true,
            Some("muxed") => {
                tracing::debug!(adaptation_set = ?self.id, "excluding muxed content");
                return false;
            }
            _ => {}
        }

        if self
            .mime_type
            .as_deref()
            .is_some_and(|mime| media_type.is_compatible_mime_type(mime, self.codecs.as_deref()))
        {
            return true;
        }

        if self.representations.iter().any(|r| {
            r.mime_type.as_deref().is_some_and(|mime| {
                media_type.is_compatible_mime_type(mime, self.codecs_of(r))
            })
        }) {
            return true;
        }

        self.content_components.iter().any(|c| c == name)
    }

    pub fn is_iframe_track(&self) -> bool {
        self.essential_properties
            .iter()
            .any(|p| p.scheme_id_uri == TRICKMODE_SCHEME)
    }

    /// Pick the representation with the preferred audio codec.
    ///
    /// `selected` carries the codec chosen so far across adaptation sets and is updated when a
    /// representation of this set wins. Priority is Atmos > DD+ > AAC unless disabled; within
    /// one codec the higher bandwidth wins.
    pub fn desired_codec_index(
        &self,
        selected: &mut AudioCodec,
        disable_atmos: bool,
        disable_ec3: bool,
    ) -> Option<usize> {
        let mut index = None;
        let mut selected_bandwidth = 0;
        for (i, representation) in self.representations.iter().enumerate() {
            let codec = AudioCodec::from_codecs(self.codecs_of(representation));
            let bandwidth = representation.bandwidth;

            let better = *selected == AudioCodec::Unknown
                || (*selected == codec && bandwidth > selected_bandwidth)
                || (*selected < AudioCodec::Atmos
                    && codec == AudioCodec::Atmos
                    && !disable_atmos
                    && !disable_ec3)
                || (*selected < AudioCodec::DdPlus && codec == AudioCodec::DdPlus && !disable_ec3)
                || (*selected != AudioCodec::Aac && codec == AudioCodec::Aac && disable_ec3);

            if better {
                index = Some(i);
                *selected = codec;
                selected_bandwidth = bandwidth;
            }
        }
        index
    }
}

impl Representation {
    /// Treat representations above 1080p as 4K.
    pub fn is_4k(&self) -> bool {
        self.height.is_some_and(|h| h > 1080) || self.width.is_some_and(|w| w > 1920)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Descriptor;

    fn audio_representation(codecs: &str, bandwidth: u64) -> Representation {
        Representation {
            id: format!("{codecs}-{bandwidth}"),
            bandwidth,
            codecs: Some(codecs.to_string()),
            ..Default::default()
        }
    }

    fn audio_set() -> AdaptationSet {
        AdaptationSet {
            mime_type: Some("audio/mp4".to_string()),
            representations: vec![
                audio_representation("mp4a.40.2", 128_000),
                audio_representation("mp4a.40.2", 192_000),
                audio_representation("ec-3", 384_000),
                audio_representation("ec+3", 768_000),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_codec_priority() {
        let set = audio_set();

        let mut codec = AudioCodec::Unknown;
        assert_eq!(set.desired_codec_index(&mut codec, false, false), Some(3));
        assert_eq!(codec, AudioCodec::Atmos);

        let mut codec = AudioCodec::Unknown;
        assert_eq!(set.desired_codec_index(&mut codec, true, false), Some(2));
        assert_eq!(codec, AudioCodec::DdPlus);

        let mut codec = AudioCodec::Unknown;
        assert_eq!(set.desired_codec_index(&mut codec, false, true), Some(1));
        assert_eq!(codec, AudioCodec::Aac);
    }

    #[test]
    fn test_content_type_detection() {
        let set = audio_set();
        assert!(set.is_content_type(MediaType::Audio));
        assert!(!set.is_content_type(MediaType::Video));

        let muxed = AdaptationSet {
            content_type: Some("muxed".to_string()),
            mime_type: Some("video/mp4".to_string()),
            ..Default::default()
        };
        assert!(!muxed.is_content_type(MediaType::Video));

        let component = AdaptationSet {
            content_components: vec!["text".to_string()],
            ..Default::default()
        };
        assert!(component.is_content_type(MediaType::Subtitle));

        let stpp = AdaptationSet {
            mime_type: Some("application/mp4".to_string()),
            codecs: Some("stpp.ttml.im1t".to_string()),
            ..Default::default()
        };
        assert!(stpp.is_content_type(MediaType::Subtitle));
    }

    #[test]
    fn test_iframe_detection() {
        let mut set = AdaptationSet {
            content_type: Some("video".to_string()),
            ..Default::default()
        };
        assert!(!set.is_iframe_track());
        set.essential_properties.push(Descriptor {
            scheme_id_uri: TRICKMODE_SCHEME.to_string(),
            value: Some("1".to_string()),
        });
        assert!(set.is_iframe_track());
    }
}
