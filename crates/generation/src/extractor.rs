//! Turns a post-generation page state into ordered image references.

use {
    mirage_browser::{PageState, Selector},
    mirage_config::SurfaceConfig,
    tracing::debug,
    url::Url,
};

use crate::{error::Result, signal::parse_all};

/// `data:` URLs shorter than this are lazy-load placeholders, not results.
const MIN_DATA_URL_LEN: usize = 256;

#[derive(Debug, Clone)]
pub struct ImageExtractor {
    result_images: Vec<Selector>,
    thumbnail_params: Vec<String>,
}

impl ImageExtractor {
    pub fn new(result_images: Vec<Selector>, thumbnail_params: Vec<String>) -> Self {
        Self {
            result_images,
            thumbnail_params,
        }
    }

    pub fn from_config(cfg: &SurfaceConfig) -> Result<Self> {
        Ok(Self::new(
            parse_all("surface.result_images", &cfg.result_images)?,
            cfg.thumbnail_params.clone(),
        ))
    }

    /// Selectors the page state must be sampled with.
    pub fn watched(&self) -> &[Selector] {
        &self.result_images
    }

    /// Image references in on-page order, without duplicates.
    ///
    /// Returns whatever is present; a partial batch is not an error here.
    pub fn extract(&self, state: &PageState) -> Vec<String> {
        let base = Url::parse(&state.url).ok();
        let mut refs: Vec<String> = Vec::new();

        for selector in &self.result_images {
            for element in state.matches(selector) {
                let Some(src) = element.src.as_deref().map(str::trim) else {
                    continue;
                };
                let Some(reference) = self.normalize(src, base.as_ref()) else {
                    continue;
                };
                if !refs.contains(&reference) {
                    refs.push(reference);
                }
            }
        }

        debug!(count = refs.len(), "extracted image references");
        refs
    }

    /// Resolve `src` against the page and strip thumbnail sizing parameters.
    fn normalize(&self, src: &str, base: Option<&Url>) -> Option<String> {
        if src.is_empty() {
            return None;
        }
        let lower = src.to_ascii_lowercase();
        if lower.starts_with("data:") {
            return (src.len() >= MIN_DATA_URL_LEN).then(|| src.to_string());
        }
        if lower.starts_with("blob:") {
            return Some(src.to_string());
        }

        let mut url = match base {
            Some(base) => base.join(src).ok()?,
            None => Url::parse(src).ok()?,
        };
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }

        if url.query().is_some() {
            let kept: Vec<(String, String)> = url
                .query_pairs()
                .filter(|(k, _)| !self.thumbnail_params.iter().any(|p| p == k))
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            if kept.is_empty() {
                url.set_query(None);
            } else {
                url.query_pairs_mut().clear().extend_pairs(kept);
            }
        }
        url.set_fragment(None);
        Some(url.to_string())
    }
}
