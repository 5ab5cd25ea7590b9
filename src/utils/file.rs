//! File utilities for reading repository checkouts.

use std::fs;
use std::io::Read;
use std::path::{Component, Path};

/// Bytes inspected when sniffing for binary content.
const SNIFF_LEN: usize = 8000;

/// Check if a file is likely a text file.
///
/// Known extensions decide immediately; anything else is sniffed for NUL bytes.
pub fn is_text_file(path: &Path) -> bool {
    if let Some(ext) = path.extension() {
        let ext = ext.to_string_lossy().to_lowercase();
        if is_binary_extension(&ext) {
            return false;
        }
        if is_text_extension(&ext) {
            return true;
        }
    }

    match fs::File::open(path) {
        Ok(file) => {
            let mut buffer = Vec::with_capacity(SNIFF_LEN);
            match file.take(SNIFF_LEN as u64).read_to_end(&mut buffer) {
                Ok(_) => !looks_binary(&buffer),
                Err(_) => false,
            }
        }
        Err(_) => false,
    }
}

/// NUL bytes do not occur in text encodings we index.
pub fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(SNIFF_LEN).any(|b| *b == 0)
}

/// Read a file as text, replacing invalid UTF-8.
///
/// Returns `None` when the file is larger than `max_size` bytes.
pub fn read_file_lossy(path: &Path, max_size: u64) -> std::io::Result<Option<String>> {
    let metadata = fs::metadata(path)?;
    if metadata.len() > max_size {
        return Ok(None);
    }

    let bytes = fs::read(path)?;
    Ok(Some(match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }))
}

/// Path of `path` relative to `base`, joined with `/` on every platform.
pub fn relative_path(base: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Check if extension indicates a binary file.
fn is_binary_extension(ext: &str) -> bool {
    matches!(
        ext,
        "exe"
            | "dll"
            | "so"
            | "dylib"
            | "a"
            | "o"
            | "obj"
            | "rlib"
            | "wasm"
            | "png"
            | "jpg"
            | "jpeg"
            | "gif"
            | "bmp"
            | "ico"
            | "webp"
            | "mp3"
            | "mp4"
            | "avi"
            | "mkv"
            | "mov"
            | "wav"
            | "flac"
            | "zip"
            | "tar"
            | "gz"
            | "tgz"
            | "bz2"
            | "xz"
            | "zst"
            | "7z"
            | "rar"
            | "pdf"
            | "doc"
            | "docx"
            | "xls"
            | "xlsx"
            | "ppt"
            | "pptx"
            | "woff"
            | "woff2"
            | "ttf"
            | "otf"
            | "eot"
            | "class"
            | "jar"
            | "pyc"
            | "pyo"
            | "db"
            | "sqlite"
            | "sqlite3"
            | "bin"
            | "dat"
            | "pak"
            | "npy"
            | "onnx"
            | "safetensors"
    )
}

/// Check if extension indicates a text file.
fn is_text_extension(ext: &str) -> bool {
    matches!(
        ext,
        // Source code
        "rs" | "py" | "js" | "ts" | "jsx" | "tsx" | "mjs" | "cjs" | "go" | "java" | "kt" | "kts"
            | "c" | "h" | "cpp" | "hpp" | "cc" | "cxx" | "hh" | "cs" | "m" | "mm"
            | "rb" | "php" | "swift" | "scala" | "clj" | "cljs" | "erl" | "ex" | "exs"
            | "hs" | "ml" | "fs" | "fsi" | "fsx" | "dart" | "zig" | "nim"
            | "sh" | "bash" | "zsh" | "fish" | "ps1" | "bat" | "cmd"
            | "lua" | "pl" | "pm" | "r" | "jl"
            // Web
            | "html" | "htm" | "css" | "scss" | "sass" | "less"
            | "vue" | "svelte" | "astro" | "svg"
            // Data/Config
            | "json" | "yaml" | "yml" | "toml" | "xml" | "ini" | "cfg"
            | "env" | "properties" | "conf" | "lock"
            // Documentation
            | "md" | "markdown" | "rst" | "txt" | "adoc" | "org"
            // Other
            | "sql" | "graphql" | "gql" | "proto" | "prisma"
            | "dockerfile" | "makefile" | "justfile"
            | "gitignore" | "gitattributes" | "editorconfig"
    )
}
