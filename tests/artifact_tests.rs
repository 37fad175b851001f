// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Streaming parser and merge behavior of project artifacts

use proptest::prelude::*;

use pluribots::artifact::{parse_artifact, ArtifactStreamer, ProjectArtifact, StreamerEvent};

fn document(files: &[(String, String)]) -> String {
    let mut doc = String::from("Here is the project.\n<pluriArtifact id=\"p\" title=\"P\">\n");
    for (path, content) in files {
        doc.push_str(&format!(
            "<pluriAction type=\"file\" filePath=\"{}\">\n{}\n</pluriAction>\n",
            path, content
        ));
    }
    doc.push_str("</pluriArtifact>\nDone.");
    doc
}

/// Final (non-partial) file updates produced by feeding `chunks` in order
fn final_files<'a>(chunks: impl IntoIterator<Item = &'a str>) -> Vec<(String, String)> {
    let mut streamer = ArtifactStreamer::new();
    let mut out = Vec::new();
    for chunk in chunks {
        for event in streamer.on_token(chunk) {
            if let StreamerEvent::FileUpdate(update) = event {
                if !update.partial {
                    out.push((update.file_path, update.content));
                }
            }
        }
    }
    out
}

fn chunked(text: &str, sizes: &[usize]) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while start < chars.len() {
        let size = sizes.get(i % sizes.len().max(1)).copied().unwrap_or(1).max(1);
        let end = (start + size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        start = end;
        i += 1;
    }
    chunks
}

fn files_strategy() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::vec(
        ("[a-z]{1,8}\\.(html|css|js)", "[a-zA-Z0-9 {}();=.é\n]{0,120}"),
        1..5,
    )
}

proptest! {
    #[test]
    fn prop_chunking_does_not_change_files(
        files in files_strategy(),
        sizes in prop::collection::vec(1usize..40, 1..8),
    ) {
        let doc = document(&files);
        let whole = final_files([doc.as_str()]);
        let pieces = chunked(&doc, &sizes);
        let streamed = final_files(pieces.iter().map(String::as_str));

        prop_assert_eq!(&streamed, &whole);
        prop_assert_eq!(whole, files);
    }

    #[test]
    fn prop_merge_keeps_every_path_and_prefers_update(
        base in files_strategy(),
        update in files_strategy(),
    ) {
        let to_artifact = |files: &[(String, String)]| {
            files.iter().fold(ProjectArtifact::new("p", "P"), |a, (path, content)| {
                // The generator may repeat a path; keep the first like a real artifact would.
                if a.file(path).is_some() { a } else { a.with_file(path.clone(), content.clone()) }
            })
        };
        let base = to_artifact(&base);
        let update = to_artifact(&update);
        let merged = base.merge(&update);

        for file in &update.files {
            prop_assert_eq!(&merged.file(&file.file_path).unwrap().content, &file.content);
        }
        for file in &base.files {
            prop_assert!(merged.file(&file.file_path).is_some());
        }
        // Existing paths keep their position; new ones follow.
        for (i, file) in base.files.iter().enumerate() {
            prop_assert_eq!(&merged.files[i].file_path, &file.file_path);
        }
        prop_assert_eq!(base.merge(&ProjectArtifact::default()), base);
    }
}

#[test]
fn test_streamed_and_parsed_agree() {
    let files = vec![
        ("index.html".to_string(), "<h1>Hi</h1>".to_string()),
        ("app.js".to_string(), "console.log(1);".to_string()),
    ];
    // Markup inside file bodies is fine as long as it is not a closing action tag.
    let doc = document(&files);
    let streamed = final_files(chunked(&doc, &[3]).iter().map(String::as_str));
    let parsed = parse_artifact(&doc).unwrap();

    let parsed_files: Vec<(String, String)> = parsed
        .files
        .into_iter()
        .map(|f| (f.file_path, f.content))
        .collect();
    assert_eq!(streamed, parsed_files);
    assert_eq!(parsed.id, "p");
}

#[test]
fn test_refinement_merge_then_markup_reparses() {
    let v1 = ProjectArtifact::new("shop", "Shop")
        .with_file("index.html", "<h1>Shop</h1>")
        .with_file("style.css", "body{}");
    let v2 = ProjectArtifact::new("shop", "")
        .with_file("index.html", "<h1>Better</h1>")
        .with_file("app.js", "init();");

    let merged = v1.merge(&v2);
    assert_eq!(merged.title, "Shop");
    let paths: Vec<&str> = merged.files.iter().map(|f| f.file_path.as_str()).collect();
    assert_eq!(paths, vec!["index.html", "style.css", "app.js"]);

    let reparsed = parse_artifact(&merged.to_markup()).unwrap();
    assert_eq!(reparsed, merged);
}
