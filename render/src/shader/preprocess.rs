//! `#include` resolution and macro-define injection for text shaders.
//!
//! Works on GLSL and HLSL style sources: `#include "file"` lines are replaced
//! by the body of the first matching file from the search path list, with
//! `#line` directives re-establishing the original numbering around each
//! splice. Each distinct file is inlined once; an include that is already on
//! the open ancestor chain is a cycle and aborts the whole preprocess.

use lazy_static::lazy_static;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ErrorKind, GraphicsError, Result};

lazy_static! {
    static ref RE_INCLUDE: Regex =
        Regex::new(r#"^\s*#include\s+"(?P<path>[^"]*)"\s*$"#).unwrap();
    static ref RE_MACRO_DEF: Regex = Regex::new(r"^\w+$").unwrap();
}

struct IncludeFrame<'a> {
    parent: Option<&'a IncludeFrame<'a>>,
    path: Option<&'a Path>,
}

impl<'a> IncludeFrame<'a> {
    fn chain_contains(&self, candidate: &Path) -> bool {
        let mut cur = Some(self);
        while let Some(frame) = cur {
            if frame.path == Some(candidate) {
                return true;
            }
            cur = frame.parent;
        }
        false
    }
}

struct PpState {
    output: String,
    /// Source index per inlined file, for `#line file` arguments.
    src_map: Vec<Option<PathBuf>>,
    /// Files already inlined once; later includes of the same file are
    /// dropped instead of duplicated.
    seen: Vec<PathBuf>,
}

fn resolve_include(
    filename: &str,
    parent_dir: Option<&Path>,
    include_paths: &[PathBuf],
) -> Option<PathBuf> {
    parent_dir
        .into_iter()
        .chain(include_paths.iter().map(|p| p.as_path()))
        .map(|dir| dir.join(filename))
        .find(|candidate| candidate.is_file())
}

fn preprocess_one<'a>(
    src: &str,
    state: &mut PpState,
    include_paths: &[PathBuf],
    frame: &IncludeFrame<'a>,
) -> Result<()> {
    let file_index = state.src_map.len() as u32;
    state.src_map.push(frame.path.map(|p| p.to_path_buf()));

    let mut need_line_directive = false;

    for (line_index, line) in src.lines().enumerate() {
        let line_number = (line_index + 1) as u32;

        if let Some(captures) = RE_INCLUDE.captures(line) {
            let filename = &captures["path"];
            let parent_dir = frame.path.and_then(|p| p.parent());

            let resolved = resolve_include(filename, parent_dir, include_paths).ok_or_else(|| {
                GraphicsError::new(
                    ErrorKind::ShaderCompilationFailed,
                    format!(
                        "include file {:?} not found in any search path ({}:{})",
                        filename,
                        frame
                            .path
                            .map(|p| p.display().to_string())
                            .unwrap_or_else(|| "<memory>".to_owned()),
                        line_number
                    ),
                )
            })?;

            if frame.chain_contains(&resolved) {
                return Err(GraphicsError::new(
                    ErrorKind::ShaderCompilationFailed,
                    format!(
                        "cyclic include of {:?} ({}:{})",
                        resolved.display(),
                        frame
                            .path
                            .map(|p| p.display().to_string())
                            .unwrap_or_else(|| "<memory>".to_owned()),
                        line_number
                    ),
                ));
            }

            if state.seen.iter().any(|p| *p == resolved) {
                // already inlined once
                need_line_directive = true;
                continue;
            }
            state.seen.push(resolved.clone());

            let text = fs::read_to_string(&resolved).map_err(|e| {
                GraphicsError::new(
                    ErrorKind::ShaderCompilationFailed,
                    format!("unable to read include file {:?}: {}", resolved.display(), e),
                )
            })?;

            let child = IncludeFrame {
                parent: Some(frame),
                path: Some(&resolved),
            };
            preprocess_one(&text, state, include_paths, &child)?;
            need_line_directive = true;
            continue;
        }

        if need_line_directive {
            state
                .output
                .push_str(&format!("#line {} {}\n", line_number, file_index));
            need_line_directive = false;
        }
        state.output.push_str(line);
        state.output.push('\n');
    }

    Ok(())
}

/// Resolves `#include "…"` directives in `src` against `origin`'s directory
/// and the given search paths. Fails with `ShaderCompilationFailed` on a
/// missing file or an include cycle.
pub fn preprocess_includes(
    src: &str,
    origin: Option<&Path>,
    include_paths: &[PathBuf],
) -> Result<String> {
    let mut state = PpState {
        output: String::with_capacity(src.len()),
        src_map: Vec::new(),
        seen: Vec::new(),
    };
    if let Some(origin) = origin {
        state.seen.push(origin.to_path_buf());
    }
    let root = IncludeFrame {
        parent: None,
        path: origin,
    };
    preprocess_one(src, &mut state, include_paths, &root)?;
    Ok(state.output)
}

/// Builds the `#define` header for a set of compile-option macros, validating
/// the names.
pub fn define_header(defines: &[(String, Option<String>)]) -> Result<String> {
    let mut header = String::new();
    for (name, value) in defines {
        if !RE_MACRO_DEF.is_match(name) {
            return Err(GraphicsError::new(
                ErrorKind::ShaderCompilationFailed,
                format!("malformed macro name {:?}", name),
            ));
        }
        header.push_str("#define ");
        header.push_str(name);
        if let Some(value) = value {
            header.push(' ');
            header.push_str(value);
        }
        header.push('\n');
    }
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn plain_source_passes_through() {
        let src = "#version 450\nvoid main() {}\n";
        let out = preprocess_includes(src, None, &[]).unwrap();
        assert_eq!(out, src);
    }

    #[test]
    fn include_is_inlined() {
        let dir = tempfile::tempdir().unwrap();
        let common = dir.path().join("lighting.glsl");
        fs::write(&common, "float lambert(vec3 n, vec3 l) { return max(dot(n, l), 0.0); }\n")
            .unwrap();

        let src = "#version 450\n#include \"lighting.glsl\"\nvoid main() {}\n";
        let out = preprocess_includes(src, None, &[dir.path().to_path_buf()]).unwrap();
        assert!(out.contains("float lambert"));
        assert!(!out.contains("#include"));
        // numbering restored after the splice
        assert!(out.contains("#line 3 0"));
    }

    #[test]
    fn duplicate_include_is_inlined_once() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("common.glsl"), "const float PI = 3.14159;\n").unwrap();

        let src = "#include \"common.glsl\"\n#include \"common.glsl\"\nvoid main() {}\n";
        let out = preprocess_includes(src, None, &[dir.path().to_path_buf()]).unwrap();
        assert_eq!(out.matches("const float PI").count(), 1);
    }

    #[test]
    fn cyclic_include_fails() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.glsl"), "#include \"b.glsl\"\n").unwrap();
        fs::write(dir.path().join("b.glsl"), "#include \"a.glsl\"\n").unwrap();

        let src = "#include \"a.glsl\"\n";
        let err = preprocess_includes(src, None, &[dir.path().to_path_buf()]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ShaderCompilationFailed);
        assert!(err.message.contains("cyclic"));
    }

    #[test]
    fn missing_include_fails() {
        let src = "#include \"nope.glsl\"\n";
        let err = preprocess_includes(src, None, &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ShaderCompilationFailed);
    }

    #[test]
    fn define_header_shapes() {
        let defines = vec![
            ("USE_SHADOWS".to_owned(), None),
            ("MAX_LIGHTS".to_owned(), Some("8".to_owned())),
        ];
        let header = define_header(&defines).unwrap();
        assert_eq!(header, "#define USE_SHADOWS\n#define MAX_LIGHTS 8\n");

        let bad = vec![("NOT VALID".to_owned(), None)];
        assert!(define_header(&bad).is_err());
    }
}
