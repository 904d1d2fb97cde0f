// References:
// 1. https://github.com/clitic/vsd/blob/30ca1985e4a467ea3304b11c08d3176deaafd22a/vsd/src/dash/template.rs
// 2. https://github.com/emarsden/dash-mpd-rs/blob/6ebdfb4759adbda8233b5b3520804e23ff86e7de/src/fetch.rs#L435-L466

use regex::{Captures, Regex, Replacer};
use std::{collections::HashMap, sync::LazyLock};
use url::Url;

use crate::{
    url::{as_directory, is_absolute_url, merge_baseurls},
    IoriResult,
};

// DASH-IF IOP only permits `%0[width]d`, but manifests in the wild carry other printf
// conversions (`%d`, `%5d`, `%08x`, `%lu`). Anything after the identifier up to the closing `$`
// is captured; conversions that can not be understood fall back to plain decimal.
//
// Example template: "$RepresentationID$/$Number%06d$.m4s"
static TEMPLATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:(RepresentationID|Number|Time|Bandwidth)(%[^$]*)?)?\$")
        .expect("template regex is valid")
});

static FORMAT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^%(0)?(\d+)?(?:l|ll|j|z)?([diuxX])$").expect("format regex is valid")
});

#[derive(Debug, Clone, PartialEq)]
enum TemplateValue {
    Text(String),
    Number(u64),
}

#[derive(Debug, Clone, Default)]
pub struct Template<'a> {
    args: HashMap<&'a str, TemplateValue>,
}

impl<'a> Template<'a> {
    pub const REPRESENTATION_ID: &'static str = "RepresentationID";
    pub const NUMBER: &'static str = "Number";
    pub const TIME: &'static str = "Time";
    pub const BANDWIDTH: &'static str = "Bandwidth";

    pub fn new() -> Self {
        Self {
            args: HashMap::with_capacity(4),
        }
    }

    pub fn insert(&mut self, key: &'a str, value: String) -> &mut Self {
        self.args.insert(key, TemplateValue::Text(value));
        self
    }

    pub fn insert_number(&mut self, key: &'a str, value: u64) -> &mut Self {
        self.args.insert(key, TemplateValue::Number(value));
        self
    }

    /// Substitute every known identifier. Unknown or missing identifiers are left untouched and
    /// `$$` collapses into a literal `$`.
    pub fn resolve(&self, template: &str) -> String {
        TEMPLATE_REGEX
            .replace_all(template, TemplateReplacer(&self.args))
            .to_string()
    }
}

struct TemplateReplacer<'a, 'b>(&'b HashMap<&'a str, TemplateValue>);

impl Replacer for TemplateReplacer<'_, '_> {
    fn replace_append(&mut self, caps: &Captures<'_>, dst: &mut String) {
        let Some(key) = caps.get(1) else {
            // escaped `$$`
            dst.push('$');
            return;
        };
        let Some(value) = self.0.get(key.as_str()) else {
            dst.push_str(&caps[0]);
            return;
        };

        let format = caps.get(2).map(|m| m.as_str());
        dst.push_str(&format_value(value, format));
    }
}

fn format_value(value: &TemplateValue, format: Option<&str>) -> String {
    let number = match value {
        TemplateValue::Number(number) => *number,
        TemplateValue::Text(text) => {
            // Strings only honour the width.
            let width = format
                .and_then(|f| FORMAT_REGEX.captures(f))
                .and_then(|c| c.get(2))
                .and_then(|w| w.as_str().parse::<usize>().ok());
            return match width {
                Some(width) => format!("{text:0>width$}"),
                None => text.clone(),
            };
        }
    };

    let Some(caps) = format.and_then(|f| FORMAT_REGEX.captures(f)) else {
        if let Some(format) = format {
            tracing::debug!(format, "unsupported template format, using decimal");
        }
        return number.to_string();
    };

    let zero_pad = caps.get(1).is_some();
    let width = caps
        .get(2)
        .and_then(|w| w.as_str().parse::<usize>().ok())
        .unwrap_or(0);
    let formatted = match &caps[3] {
        "x" => format!("{number:x}"),
        "X" => format!("{number:X}"),
        _ => number.to_string(),
    };

    if zero_pad {
        format!("{formatted:0>width$}")
    } else {
        format!("{formatted:>width$}")
    }
}

/// Addressing state of one track, rewritten in place whenever the representation changes.
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentDescriptor {
    /// Manifest the fragments belong to. Redirected to the ad manifest while an ad plays.
    pub manifest_url: Url,
    /// `BaseURL`s from the MPD level down to the representation level.
    pub base_urls: Vec<String>,
    pub representation_id: String,
    pub bandwidth: u64,
    pub number: u64,
    /// Presentation time of the fragment in timescale units.
    pub time: u64,
}

impl FragmentDescriptor {
    pub fn new(manifest_url: Url) -> Self {
        Self {
            manifest_url,
            base_urls: Vec::new(),
            representation_id: String::new(),
            bandwidth: 0,
            number: 0,
            time: 0,
        }
    }

    /// Replace the base URL chain, outermost level first. A `BaseURL` of "/" is dropped when
    /// `ignore_slash` is set.
    pub fn set_base_urls<'a>(
        &mut self,
        chain: impl IntoIterator<Item = Option<&'a str>>,
        ignore_slash: bool,
    ) {
        self.base_urls = chain
            .into_iter()
            .flatten()
            .filter(|base| !base.is_empty() && !(ignore_slash && *base == "/"))
            .map(str::to_string)
            .collect();
    }

    /// Effective base: every level is resolved against its parent, starting at the manifest.
    pub fn base_url(&self) -> IoriResult<Url> {
        self.merged_base(false)
    }

    /// With `file` set the innermost level names a resource rather than a directory.
    fn merged_base(&self, file: bool) -> IoriResult<Url> {
        let mut current = self.manifest_url.clone();
        let last = self.base_urls.len().saturating_sub(1);
        for (index, base) in self.base_urls.iter().enumerate() {
            current = if file && index == last {
                merge_baseurls(&current, base)?
            } else {
                merge_baseurls(&current, &as_directory(base))?
            };
        }
        Ok(current)
    }

    pub fn template(&self) -> Template<'static> {
        let mut template = Template::new();
        template
            .insert(Template::REPRESENTATION_ID, self.representation_id.clone())
            .insert_number(Template::BANDWIDTH, self.bandwidth)
            .insert_number(Template::NUMBER, self.number)
            .insert_number(Template::TIME, self.time);
        template
    }

    /// Substitute the identifiers of `pattern` with the current values.
    pub fn substitute(&self, pattern: &str) -> String {
        self.template().resolve(pattern)
    }

    /// URL of `pattern` for the current position. An empty pattern addresses the base URL
    /// itself, which is how single-file representations are fetched.
    pub fn resolve(&self, pattern: &str) -> IoriResult<Url> {
        let path = self.substitute(pattern);
        if is_absolute_url(&path) {
            return Ok(Url::parse(&path)?);
        }
        if path.is_empty() {
            return self.merged_base(true);
        }
        merge_baseurls(&self.base_url()?, &path)
    }
}
