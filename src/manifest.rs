use std::path::Path;

use serde_json::Value;
use tracing::info;

use crate::error::{Error, Result};
use crate::fetch::HttpFetcher;

/// Namespace used for structure ids when the manifest has no usable `@id`.
pub const DEFAULT_NAMESPACE: &str = "http://example.com/manifest";

/// One physical page of the volume, in manifest order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageDescriptor {
    /// 1-based position in the manifest.
    pub index: usize,
    /// Stable identifier: last path segment of the image service `@id`.
    pub id: Option<String>,
    /// The canvas `@id`, listed as a member of structure ranges.
    pub canvas_id: Option<String>,
    /// Full-resolution image URL derived from the image service.
    pub image_locator: Option<String>,
}

/// A parsed IIIF presentation manifest.
///
/// The raw document is kept so that fields this crate never looks at are
/// written back unchanged.
#[derive(Debug, Clone)]
pub struct Manifest {
    document: Value,
    pages: Vec<PageDescriptor>,
}

impl Manifest {
    pub fn from_value(document: Value, image_size: &str) -> Result<Self> {
        if !document.is_object() {
            return Err(Error::Manifest("top level is not a JSON object".into()));
        }

        let pages = canvases(&document)
            .iter()
            .enumerate()
            .map(|(i, canvas)| describe_canvas(i + 1, canvas, image_size))
            .collect();

        Ok(Self { document, pages })
    }

    pub fn from_slice(bytes: &[u8], image_size: &str) -> Result<Self> {
        let document: Value = serde_json::from_slice(bytes)?;
        Self::from_value(document, image_size)
    }

    pub fn pages(&self) -> &[PageDescriptor] {
        &self.pages
    }

    pub fn total_pages(&self) -> usize {
        self.pages.len()
    }

    /// Validated slice of pages `start..=end` (1-based, inclusive).
    pub fn page_range(&self, start: usize, end: usize) -> Result<&[PageDescriptor]> {
        let total = self.total_pages();
        if total == 0 {
            return Err(Error::EmptySource);
        }
        if start < 1 || end > total || start > end {
            return Err(Error::InvalidRange { start, end, total });
        }
        Ok(&self.pages[start - 1..end])
    }

    /// Base for structure ids: the manifest `@id`, or [`DEFAULT_NAMESPACE`].
    pub fn namespace(&self) -> &str {
        self.document
            .get("@id")
            .and_then(Value::as_str)
            .filter(|id| !id.trim().is_empty())
            .unwrap_or(DEFAULT_NAMESPACE)
    }

    pub fn label(&self) -> Option<String> {
        match self.document.get("label")? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    pub fn into_document(self) -> Value {
        self.document
    }
}

/// Load a manifest from an `http(s)` URL or a local file.
pub async fn load(source: &str, fetcher: &HttpFetcher, image_size: &str) -> Result<Manifest> {
    let bytes = if is_remote(source) {
        info!("Fetching manifest: {}", source);
        fetcher.fetch_manifest(source).await?
    } else {
        info!("Reading manifest: {}", source);
        tokio::fs::read(Path::new(source))
            .await
            .map_err(|e| Error::fetch(source, e))?
    };

    let manifest = Manifest::from_slice(&bytes, image_size)?;
    info!("Found {} pages in manifest", manifest.total_pages());
    Ok(manifest)
}

fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

fn canvases(document: &Value) -> &[Value] {
    document
        .get("sequences")
        .and_then(|s| s.get(0))
        .and_then(|s| s.get("canvases"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn describe_canvas(index: usize, canvas: &Value, image_size: &str) -> PageDescriptor {
    let service = service_id(canvas);
    PageDescriptor {
        index,
        id: service.and_then(id_from_service),
        canvas_id: canvas.get("@id").and_then(Value::as_str).map(str::to_string),
        image_locator: service.map(|s| image_url(s, image_size)),
    }
}

/// `images[0].resource.service.@id`; a service given as a list uses its first entry.
fn service_id(canvas: &Value) -> Option<&str> {
    let service = canvas
        .get("images")?
        .get(0)?
        .get("resource")?
        .get("service")?;
    let service = match service {
        Value::Array(list) => list.first()?,
        other => other,
    };
    service
        .get("@id")
        .and_then(Value::as_str)
        .filter(|id| !id.trim().is_empty())
}

/// Full-image request against an image service, e.g. `{service}/full/1200,/0/default.jpg`.
pub fn image_url(service_id: &str, size: &str) -> String {
    format!("{}/full/{}/0/default.jpg", service_id.trim_end_matches('/'), size)
}

/// Last path segment of an image service `@id`.
pub fn id_from_service(service_id: &str) -> Option<String> {
    service_id
        .trim_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixture() -> Manifest {
        let bytes = std::fs::read("tests/fixtures/volume.json").unwrap();
        Manifest::from_slice(&bytes, "1200,").unwrap()
    }

    #[test]
    fn parses_fixture_canvases() {
        let m = fixture();
        assert_eq!(m.total_pages(), 6);
        let first = &m.pages()[0];
        assert_eq!(first.index, 1);
        assert_eq!(first.id.as_deref(), Some("p1"));
        assert_eq!(
            first.canvas_id.as_deref(),
            Some("https://iiif.example.org/volume/canvas/c1")
        );
        assert_eq!(
            first.image_locator.as_deref(),
            Some("https://iiif.example.org/iiif/p1/full/1200,/0/default.jpg")
        );
        assert_eq!(m.namespace(), "https://iiif.example.org/volume/manifest");
        assert_eq!(m.label().as_deref(), Some("Gazeta Codzienna 1911"));
    }

    #[test]
    fn canvas_without_image_has_no_locator() {
        let m = fixture();
        let fifth = &m.pages()[4];
        assert_eq!(fifth.index, 5);
        assert_eq!(fifth.image_locator, None);
        assert_eq!(fifth.id, None);
        assert!(fifth.canvas_id.is_some());
    }

    #[test]
    fn service_url_helpers() {
        assert_eq!(
            image_url("https://h/iiif/abc/", "1200,"),
            "https://h/iiif/abc/full/1200,/0/default.jpg"
        );
        assert_eq!(id_from_service("https://h/iiif/abc/"), Some("abc".to_string()));
        assert_eq!(id_from_service("abc"), Some("abc".to_string()));
        assert_eq!(id_from_service("///"), None);
    }

    #[test]
    fn service_list_uses_first_entry() {
        let doc = json!({
            "sequences": [{ "canvases": [{
                "@id": "c1",
                "images": [{ "resource": { "service": [{ "@id": "https://h/iiif/x1" }] } }]
            }]}]
        });
        let m = Manifest::from_value(doc, "800,").unwrap();
        assert_eq!(m.pages()[0].id.as_deref(), Some("x1"));
        assert_eq!(
            m.pages()[0].image_locator.as_deref(),
            Some("https://h/iiif/x1/full/800,/0/default.jpg")
        );
    }

    #[test]
    fn missing_sequences_is_empty() {
        let m = Manifest::from_value(json!({ "@id": "  " }), "1200,").unwrap();
        assert_eq!(m.total_pages(), 0);
        assert_eq!(m.namespace(), DEFAULT_NAMESPACE);
        assert!(matches!(m.page_range(1, 1), Err(Error::EmptySource)));
    }

    #[test]
    fn rejects_non_object() {
        assert!(matches!(
            Manifest::from_value(json!([1, 2]), "1200,"),
            Err(Error::Manifest(_))
        ));
    }

    #[test]
    fn page_range_bounds() {
        let m = fixture();
        assert_eq!(m.page_range(2, 4).unwrap().len(), 3);
        assert_eq!(m.page_range(6, 6).unwrap()[0].index, 6);
        for (start, end) in [(0, 3), (1, 7), (4, 3)] {
            assert!(matches!(
                m.page_range(start, end),
                Err(Error::InvalidRange { total: 6, .. })
            ));
        }
    }
}
