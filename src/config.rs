use serde::{Deserialize, Serialize};

use crate::retrieval::chunk::HeadingLevel;

/// Maximum allowed length for search queries (characters).
pub const MAX_SEARCH_QUERY_LENGTH: usize = 1000;

/// Canonical list of file extensions considered indexable. The retrieval
/// core only ever chunks Markdown, but the file browser and stat endpoints
/// use this broader list for display purposes.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "ts", "tsx", "js", "jsx", "mjs", "cjs",
    "rs", "py", "go", "java", "c", "cpp", "h", "hpp",
    "cs", "rb", "php", "swift", "kt", "scala",
    "html", "css", "scss", "less", "sass",
    "json", "yaml", "yml", "toml", "xml",
    "md", "mdx", "txt", "rst",
    "sql", "graphql", "gql",
    "sh", "bash", "zsh", "fish", "ps1", "bat", "cmd",
    "dockerfile", "makefile",
    "vue", "svelte", "astro",
    "lua", "zig", "nim", "dart", "elixir", "ex", "exs",
    "r", "jl", "clj", "cljs", "cljc", "erl", "hrl",
    "tf", "hcl", "proto",
    "env", "ini", "cfg", "conf",
];

pub fn is_supported_extension(ext: &str) -> bool {
    SUPPORTED_EXTENSIONS.contains(&ext)
}

/// Directories that are never walked when scanning a workspace, regardless
/// of user-provided exclude patterns.
const BUILT_IN_EXCLUDED_DIRS: &[&str] = &[
    ".git", "node_modules", "target", "dist", "build", ".next", ".nuxt",
    ".venv", "venv", "__pycache__", ".cache", ".vyotiq-data",
];

pub fn is_excluded_directory(name: &str) -> bool {
    BUILT_IN_EXCLUDED_DIRS.contains(&name)
}

/// Match a file/directory name against user-supplied glob-ish exclude
/// patterns (simple substring/glob match via `globset`).
pub fn matches_user_exclude_patterns(name: &str, patterns: &[String]) -> bool {
    use globset::Glob;
    patterns.iter().any(|pattern| {
        Glob::new(pattern)
            .map(|g| g.compile_matcher().is_match(name))
            .unwrap_or(false)
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub listen_addr: String,
    pub max_index_size_mb: usize,
    pub max_file_size_bytes: usize,
    pub max_indexed_files: usize,
    pub watcher_debounce_ms: u64,
    pub index_batch_size: usize,
    pub enable_file_watcher: bool,
    pub data_dir: String,

    // Retrieval defaults, overridable per workspace at runtime via the
    // settings endpoints; these seed `RetrievalSettings::default()`.
    pub enable_bm25: bool,
    pub enable_semantic_index: bool,
    pub default_top_k: usize,
    pub chunk_words: usize,
    pub chunk_overlap_words: usize,
    pub chunk_heading_level: HeadingLevel,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let port = std::env::var("VYOTIQ_PORT").unwrap_or_else(|_| "9721".to_string());

        let data_dir = std::env::var("VYOTIQ_DATA_DIR").unwrap_or_else(|_| {
            dirs::data_local_dir()
                .map(|d| d.join("vyotiq-backend").to_string_lossy().to_string())
                .unwrap_or_else(|| ".vyotiq-data".to_string())
        });

        let heading_level = match std::env::var("VYOTIQ_CHUNK_HEADING_LEVEL").ok().as_deref() {
            Some("h1") => HeadingLevel::H1,
            Some("h3") => HeadingLevel::H3,
            Some("none") => HeadingLevel::None,
            _ => HeadingLevel::H2,
        };

        Self {
            listen_addr: format!("127.0.0.1:{}", port),
            max_index_size_mb: env_parsed("VYOTIQ_MAX_INDEX_MB", 512),
            max_file_size_bytes: env_parsed("VYOTIQ_MAX_FILE_SIZE", 10 * 1024 * 1024),
            max_indexed_files: env_parsed("VYOTIQ_MAX_INDEXED_FILES", 50_000),
            watcher_debounce_ms: env_parsed("VYOTIQ_WATCHER_DEBOUNCE_MS", 300),
            index_batch_size: env_parsed("VYOTIQ_INDEX_BATCH_SIZE", 50),
            enable_file_watcher: env_parsed_bool("VYOTIQ_ENABLE_FILE_WATCHER", true),
            data_dir,
            enable_bm25: env_parsed_bool("VYOTIQ_ENABLE_BM25", true),
            enable_semantic_index: env_parsed_bool("VYOTIQ_ENABLE_SEMANTIC_INDEX", true),
            default_top_k: env_parsed("VYOTIQ_DEFAULT_TOP_K", 20),
            chunk_words: env_parsed("VYOTIQ_CHUNK_WORDS", 400),
            chunk_overlap_words: env_parsed("VYOTIQ_CHUNK_OVERLAP_WORDS", 80),
            chunk_heading_level: heading_level,
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_parsed_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}
