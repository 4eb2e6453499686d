//! Multilingual field helpers.
//!
//! Tenant items carry every translation in one record; catalog items are
//! published per language. Merging flattens both to single-language strings.

use lumen_store::{Asset, CategoryNode, LocalizedText, Playlist};

/// Whether `text` can be shown in `language`.
///
/// Legacy plain strings predate multilingual support and belong to the
/// default language only.
pub fn has_translation(text: &LocalizedText, language: &str, default_language: &str) -> bool {
    match text {
        LocalizedText::Plain(_) => language.eq_ignore_ascii_case(default_language),
        LocalizedText::Translations(_) => text.translation(language).is_some(),
    }
}

/// Flatten `text` to a plain string for `language`.
///
/// Falls back to the default language, then to the first translation.
pub fn flatten(text: &LocalizedText, language: &str, default_language: &str) -> LocalizedText {
    match text {
        LocalizedText::Plain(s) => LocalizedText::Plain(s.clone()),
        LocalizedText::Translations(_) => LocalizedText::Plain(
            text.translation(language)
                .or_else(|| text.translation(default_language))
                .or_else(|| text.first())
                .unwrap_or_default()
                .to_string(),
        ),
    }
}

pub fn localize_playlist(playlist: &Playlist, language: &str, default_language: &str) -> Playlist {
    Playlist {
        title: flatten(&playlist.title, language, default_language),
        description: flatten(&playlist.description, language, default_language),
        image: playlist
            .image
            .as_ref()
            .map(|i| flatten(i, language, default_language)),
        ..playlist.clone()
    }
}

pub fn localize_asset(asset: &Asset, language: &str, default_language: &str) -> Asset {
    Asset {
        title: flatten(&asset.title, language, default_language),
        description: flatten(&asset.description, language, default_language),
        url: flatten(&asset.url, language, default_language),
        ..asset.clone()
    }
}

/// Flatten names and images across a category tree, in place.
pub fn localize_tree(nodes: &mut [CategoryNode], language: &str, default_language: &str) {
    for node in nodes {
        node.name = flatten(&node.name, language, default_language);
        if let Some(image) = &node.image {
            node.image = Some(flatten(image, language, default_language));
        }
        localize_tree(&mut node.sub_categories, language, default_language);
    }
}
