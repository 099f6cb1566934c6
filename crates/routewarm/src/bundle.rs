//! Bundle size analysis and optimization hints
//!
//! The analyzer prefers a build artifact describing the real chunks. When
//! none is configured, or it cannot be read, it estimates the bundle from the
//! registry's per-route size hints.

use crate::{RouteRegistry, Result, SuggestionThresholds};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Number of chunks listed in `BundleAnalysis::largest_chunks`
pub const LARGEST_CHUNKS: usize = 5;

/// One chunk in a bundle analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkSummary {
    /// Chunk name (the route for estimates)
    pub name: String,
    /// Size in KB (build tools report fractions)
    pub size: f64,
    /// Share of the total size in percent
    pub percentage: f64,
}

/// Bundle composition summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleAnalysis {
    /// Total size in KB
    pub total_size: f64,
    /// Number of chunks
    pub chunk_count: usize,
    /// Largest chunks, largest first
    pub largest_chunks: Vec<ChunkSummary>,
    /// Human-readable hints
    #[serde(default)]
    pub optimization_suggestions: Vec<String>,
}

/// Optimization hint derived from an analysis
#[derive(Debug, Clone, PartialEq)]
pub enum Suggestion {
    /// Total size above the limit
    CodeSplitting { total_size: f64, limit: u64 },
    /// A single chunk dominates the bundle
    DominantChunk { name: String, percentage: f64 },
    /// Too many large chunks
    Consolidate { chunks: usize, limit: usize },
}

impl fmt::Display for Suggestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Suggestion::CodeSplitting { limit, .. } => {
                write!(f, "Bundle size above {}KB - code splitting recommended", limit)
            }
            Suggestion::DominantChunk { name, percentage } => write!(
                f,
                "Chunk \"{}\" accounts for {:.1}% - optimization recommended",
                name, percentage
            ),
            Suggestion::Consolidate { limit, .. } => {
                write!(f, "More than {} large chunks - consolidation recommended", limit)
            }
        }
    }
}

/// Evaluate the suggestion rules against an analysis.
///
/// Rules run in a fixed order and every rule that applies fires.
pub fn suggest(analysis: &BundleAnalysis, thresholds: &SuggestionThresholds) -> Vec<Suggestion> {
    let mut suggestions = Vec::new();

    if analysis.total_size > thresholds.total_size_kb as f64 {
        suggestions.push(Suggestion::CodeSplitting {
            total_size: analysis.total_size,
            limit: thresholds.total_size_kb,
        });
    }

    if let Some(top) = analysis.largest_chunks.first() {
        if top.percentage > thresholds.dominant_chunk_percent {
            suggestions.push(Suggestion::DominantChunk {
                name: top.name.clone(),
                percentage: top.percentage,
            });
        }
    }

    if analysis.largest_chunks.len() > thresholds.max_large_chunks {
        suggestions.push(Suggestion::Consolidate {
            chunks: analysis.largest_chunks.len(),
            limit: thresholds.max_large_chunks,
        });
    }

    suggestions
}

/// Source of a prebuilt bundle analysis
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Fetch and parse the artifact
    async fn fetch(&self) -> Result<BundleAnalysis>;

    /// Where the artifact comes from, for logs
    fn location(&self) -> String;
}

/// Artifact read from the local filesystem
#[cfg(not(target_arch = "wasm32"))]
#[derive(Debug, Clone)]
pub struct FileArtifact {
    path: std::path::PathBuf,
}

#[cfg(not(target_arch = "wasm32"))]
impl FileArtifact {
    /// Create a new file artifact source
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[cfg(not(target_arch = "wasm32"))]
#[async_trait]
impl ArtifactSource for FileArtifact {
    async fn fetch(&self) -> Result<BundleAnalysis> {
        let bytes = tokio::fs::read(&self.path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Artifact fetched over HTTP
#[cfg(all(feature = "http", not(target_arch = "wasm32")))]
#[derive(Debug, Clone)]
pub struct HttpArtifact {
    client: reqwest::Client,
    url: String,
}

#[cfg(all(feature = "http", not(target_arch = "wasm32")))]
impl HttpArtifact {
    /// Create a new HTTP artifact source
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    /// Create a source sharing an existing client
    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[cfg(all(feature = "http", not(target_arch = "wasm32")))]
#[async_trait]
impl ArtifactSource for HttpArtifact {
    async fn fetch(&self) -> Result<BundleAnalysis> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(crate::PreloadError::Http {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response.json().await?)
    }

    fn location(&self) -> String {
        self.url.clone()
    }
}

/// Source for an artifact location: a URL (with the `http` feature) or a
/// file path. Empty locations have no source.
pub fn artifact_source(location: &str) -> Option<Arc<dyn ArtifactSource>> {
    if location.is_empty() {
        return None;
    }
    let is_url = location.starts_with("http://") || location.starts_with("https://");

    #[cfg(all(feature = "http", not(target_arch = "wasm32")))]
    if is_url {
        return Some(Arc::new(HttpArtifact::new(location)));
    }

    if is_url {
        debug!(location, "HTTP artifacts need the `http` feature");
        return None;
    }
    file_source(location)
}

#[cfg(not(target_arch = "wasm32"))]
fn file_source(location: &str) -> Option<Arc<dyn ArtifactSource>> {
    Some(Arc::new(FileArtifact::new(location)))
}

#[cfg(target_arch = "wasm32")]
fn file_source(location: &str) -> Option<Arc<dyn ArtifactSource>> {
    debug!(location, "No filesystem in the browser");
    None
}

/// Produces bundle analyses from an artifact or the registry
#[derive(Clone, Default)]
pub struct BundleAnalyzer {
    source: Option<Arc<dyn ArtifactSource>>,
    thresholds: SuggestionThresholds,
}

impl BundleAnalyzer {
    /// Create a new analyzer with no artifact source
    pub fn new(thresholds: SuggestionThresholds) -> Self {
        Self {
            source: None,
            thresholds,
        }
    }

    /// Read analyses from `source` first
    pub fn with_source(mut self, source: Arc<dyn ArtifactSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Suggestion thresholds in use
    pub fn thresholds(&self) -> &SuggestionThresholds {
        &self.thresholds
    }

    /// Analyze the bundle.
    ///
    /// A readable artifact is returned as is; any failure falls back to
    /// [`BundleAnalyzer::estimate`].
    pub async fn analyze(&self, registry: &RouteRegistry) -> BundleAnalysis {
        if let Some(source) = &self.source {
            match source.fetch().await {
                Ok(analysis) => {
                    debug!(location = %source.location(), "Loaded bundle artifact");
                    return analysis;
                }
                Err(e) => {
                    warn!(
                        location = %source.location(),
                        error = %e,
                        "Bundle artifact unavailable, estimating from registry"
                    );
                }
            }
        }
        self.estimate(registry)
    }

    /// Estimate the bundle from registry size hints
    pub fn estimate(&self, registry: &RouteRegistry) -> BundleAnalysis {
        let total_size: u64 = registry.iter().map(|(_, c)| c.size_kb() as u64).sum();
        let total_size = total_size as f64;

        let mut chunks: Vec<(String, u64)> = registry
            .iter()
            .map(|(route, config)| (route.to_string(), config.size_kb() as u64))
            .collect();
        // Stable: equal sizes keep registry order
        chunks.sort_by(|a, b| b.1.cmp(&a.1));
        chunks.truncate(LARGEST_CHUNKS);

        let largest_chunks = chunks
            .into_iter()
            .map(|(name, size)| ChunkSummary {
                name,
                size: size as f64,
                percentage: if total_size == 0.0 {
                    0.0
                } else {
                    size as f64 / total_size * 100.0
                },
            })
            .collect();

        let mut analysis = BundleAnalysis {
            total_size,
            chunk_count: registry.len(),
            largest_chunks,
            optimization_suggestions: Vec::new(),
        };
        analysis.optimization_suggestions = suggest(&analysis, &self.thresholds)
            .iter()
            .map(ToString::to_string)
            .collect();
        analysis
    }
}

impl fmt::Debug for BundleAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleAnalyzer")
            .field("source", &self.source.as_ref().map(|s| s.location()))
            .field("thresholds", &self.thresholds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PreloadConfig, PreloadError, Priority, TriggerKind};

    fn registry(sizes: &[(&str, u32)]) -> RouteRegistry {
        sizes.iter().fold(RouteRegistry::new(), |registry, (route, size)| {
            registry.with_route(
                *route,
                PreloadConfig::new(Priority::Medium, TriggerKind::Idle).with_estimated_size_kb(*size),
            )
        })
    }

    struct Broken;

    #[async_trait]
    impl ArtifactSource for Broken {
        async fn fetch(&self) -> Result<BundleAnalysis> {
            Err(PreloadError::Artifact("not built".into()))
        }

        fn location(&self) -> String {
            "broken".into()
        }
    }

    #[test]
    fn test_estimate_percentages() {
        let analyzer = BundleAnalyzer::default();
        let analysis = analyzer.estimate(&registry(&[("A", 100), ("B", 300), ("C", 100)]));

        assert_eq!(analysis.total_size, 500.0);
        assert_eq!(analysis.chunk_count, 3);
        assert_eq!(analysis.largest_chunks[0].name, "B");
        assert!((analysis.largest_chunks[0].percentage - 60.0).abs() < 1e-9);
        // Ties keep registry order
        assert_eq!(analysis.largest_chunks[1].name, "A");
        assert_eq!(analysis.largest_chunks[2].name, "C");
        assert_eq!(analysis.optimization_suggestions.len(), 1);
    }

    #[test]
    fn test_large_dominated_bundle() {
        let analyzer = BundleAnalyzer::default();
        let analysis = analyzer.estimate(&registry(&[("A", 210), ("B", 195), ("C", 195)]));

        assert_eq!(analysis.total_size, 600.0);
        assert_eq!(
            analysis.optimization_suggestions,
            vec![
                "Bundle size above 500KB - code splitting recommended".to_string(),
                "Chunk \"A\" accounts for 35.0% - optimization recommended".to_string(),
            ]
        );
    }

    #[test]
    fn test_top_five_only() {
        let analyzer = BundleAnalyzer::default();
        let sizes: Vec<(String, u32)> = (1..=7).map(|i| (format!("/r{}", i), i * 10)).collect();
        let sizes: Vec<(&str, u32)> = sizes.iter().map(|(r, s)| (r.as_str(), *s)).collect();
        let analysis = analyzer.estimate(&registry(&sizes));

        assert_eq!(analysis.chunk_count, 7);
        assert_eq!(analysis.largest_chunks.len(), 5);
        assert_eq!(analysis.largest_chunks[0].name, "/r7");
        assert!(analysis
            .optimization_suggestions
            .iter()
            .any(|s| s.starts_with("More than 3")));
    }

    #[test]
    fn test_empty_registry() {
        let analysis = BundleAnalyzer::default().estimate(&RouteRegistry::new());
        assert_eq!(analysis.total_size, 0.0);
        assert!(analysis.largest_chunks.is_empty());
        assert!(analysis.optimization_suggestions.is_empty());
    }

    #[test]
    fn test_zero_total_percentage() {
        let analysis = BundleAnalyzer::default().estimate(&registry(&[("A", 0)]));
        assert_eq!(analysis.largest_chunks[0].percentage, 0.0);
    }

    #[test]
    fn test_custom_thresholds() {
        let thresholds = SuggestionThresholds {
            total_size_kb: 100,
            ..Default::default()
        };
        let analysis = BundleAnalyzer::new(thresholds).estimate(&registry(&[("A", 60), ("B", 60)]));
        assert!(analysis.optimization_suggestions[0].contains("above 100KB"));
    }

    #[test]
    fn test_camel_case_wire_format() {
        let analysis = BundleAnalyzer::default().estimate(&registry(&[("A", 10)]));
        let json = serde_json::to_value(&analysis).unwrap();
        assert_eq!(json["totalSize"], 10.0);
        assert_eq!(json["chunkCount"], 1);
        assert_eq!(json["largestChunks"][0]["name"], "A");
        assert!(json["optimizationSuggestions"].is_array());
    }

    #[tokio::test]
    async fn test_broken_artifact_falls_back() {
        let analyzer = BundleAnalyzer::default().with_source(Arc::new(Broken));
        let analysis = analyzer.analyze(&registry(&[("A", 100)])).await;
        assert_eq!(analysis.total_size, 100.0);
    }

    #[tokio::test]
    async fn test_file_artifact_used_verbatim() {
        let path = std::env::temp_dir().join(format!("routewarm-artifact-{}.json", std::process::id()));
        tokio::fs::write(
            &path,
            r#"{"totalSize":900,"chunkCount":12,"largestChunks":[{"name":"vendor","size":400,"percentage":44.4}],"optimizationSuggestions":["from build"]}"#,
        )
        .await
        .unwrap();

        let analyzer = BundleAnalyzer::default().with_source(Arc::new(FileArtifact::new(&path)));
        let analysis = analyzer.analyze(&registry(&[("A", 100)])).await;
        let _ = tokio::fs::remove_file(&path).await;

        assert_eq!(analysis.total_size, 900.0);
        assert_eq!(analysis.chunk_count, 12);
        assert_eq!(analysis.optimization_suggestions, vec!["from build".to_string()]);
    }

    #[tokio::test]
    async fn test_fractional_artifact_sizes() {
        let path = std::env::temp_dir().join(format!("routewarm-fractional-{}.json", std::process::id()));
        tokio::fs::write(
            &path,
            r#"{"totalSize":512.4,"chunkCount":3,"largestChunks":[{"name":"vendor","size":301.7,"percentage":58.9}]}"#,
        )
        .await
        .unwrap();

        let analyzer = BundleAnalyzer::default().with_source(Arc::new(FileArtifact::new(&path)));
        let analysis = analyzer.analyze(&registry(&[("A", 100)])).await;
        let _ = tokio::fs::remove_file(&path).await;

        assert_eq!(analysis.total_size, 512.4);
        assert_eq!(analysis.chunk_count, 3);
        assert_eq!(analysis.largest_chunks[0].size, 301.7);
        assert!(analysis.optimization_suggestions.is_empty());
    }

    #[test]
    fn test_fractional_total_above_limit() {
        let analysis = BundleAnalysis {
            total_size: 500.5,
            chunk_count: 1,
            ..Default::default()
        };
        let suggestions = suggest(&analysis, &SuggestionThresholds::default());
        assert_eq!(
            suggestions,
            vec![Suggestion::CodeSplitting {
                total_size: 500.5,
                limit: 500
            }]
        );
    }

    #[test]
    fn test_artifact_source_for_location() {
        assert!(artifact_source("").is_none());
        let file = artifact_source("dist/bundle-analysis.json").unwrap();
        assert_eq!(file.location(), "dist/bundle-analysis.json");
    }

    #[tokio::test]
    async fn test_missing_file_falls_back() {
        let analyzer = BundleAnalyzer::default()
            .with_source(Arc::new(FileArtifact::new("/nonexistent/bundle-analysis.json")));
        let analysis = analyzer.analyze(&registry(&[("A", 100), ("B", 50)])).await;
        assert_eq!(analysis.chunk_count, 2);
    }
}
