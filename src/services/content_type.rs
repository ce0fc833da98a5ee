// Copyright 2022 Paolo Galeone <nessuno@nerdz.eu>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::Path;

pub const FALLBACK: &str = "text/plain";

const OCTET_STREAM: &str = "application/octet-stream";

/// Suffix (without the dot) to MIME type. Lookups are case-sensitive.
pub const CONTENT_TYPES: &[(&str, &str)] = &[
    // images
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("svg", "image/svg+xml"),
    ("bmp", "image/bmp"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("ico", "image/vnd.microsoft.icon"),
    // web
    ("htm", "text/html"),
    ("html", "text/html"),
    ("css", "text/css"),
    ("js", "application/javascript"),
    ("json", "application/json"),
    // documents
    ("pdf", "application/pdf"),
    // fonts
    ("ttf", "font/ttf"),
    ("otf", "font/otf"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
    ("eot", "application/vnd.ms-fontobject"),
    // archives and blobs
    ("bin", OCTET_STREAM),
    ("7z", OCTET_STREAM),
    ("zip", OCTET_STREAM),
    ("gz", OCTET_STREAM),
    ("jar", OCTET_STREAM),
    ("tar", OCTET_STREAM),
    ("bz", OCTET_STREAM),
    ("bz2", OCTET_STREAM),
];

/// MIME type of `path`, looked up from the text following the last dot of
/// the file name. The content of the file is never inspected.
pub fn classify(path: &Path) -> &'static str {
    let suffix = path
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, suffix)| suffix);

    match suffix {
        Some(suffix) => CONTENT_TYPES
            .iter()
            .find(|(known, _)| *known == suffix)
            .map(|(_, mime)| *mime)
            .unwrap_or(FALLBACK),
        None => FALLBACK,
    }
}
