// Copyright (c) 2026 The Maison developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Convenience registration of handlers that serve files.
//!
//! This is a thin wrapper over the handler registry, not a production file
//! server: every file found under the mounted directory gets its own closing
//! handler, and each handler re-reads its file on each request, so edits show
//! up without re-mounting.

use std::fs;
use std::io;
use std::path::{Component, Path};

use log::debug;

use crate::handler::{Handler, HandlerTable, Payload};

/// Recursively registers one handler per file under `dir`.
///
/// URIs are derived from the file paths by stripping the `stem` prefix, so
/// mounting `./site/static` with stem `./site` serves `/static/...`. Content
/// types come from the file extension; unknown extensions are served as
/// `application/octet-stream`.
pub fn mount(handlers: &mut HandlerTable, dir: &Path, stem: &Path) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            mount(handlers, &path, stem)?;
        } else {
            register_file(handlers, &path, stem);
        }
    }
    Ok(())
}

fn register_file(handlers: &mut HandlerTable, path: &Path, stem: &Path) {
    let uri = uri_for(path, stem);
    let mime = mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_owned();
    debug!("serving {} as {} ({})", path.display(), uri, mime);

    let file = path.to_owned();
    handlers.install(Handler::at(&uri).content_type(mime).body(move |_| {
        // read errors (file vanished, permissions) surface as 500
        Ok(Payload::Bytes(fs::read(&file)?))
    }));
}

fn uri_for(path: &Path, stem: &Path) -> String {
    let tail = path.strip_prefix(stem).unwrap_or(path);
    let mut uri = String::new();
    for component in tail.components() {
        if let Component::Normal(part) = component {
            uri.push('/');
            uri.push_str(&part.to_string_lossy());
        }
    }
    uri
}
