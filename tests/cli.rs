use std::path::Path;
use std::process::{Command, Output};

const BLOCKED: &str = r#"{ "kind": "blocked", "size_per_thread": [4], "threads_per_warp": [32],
                           "warps_per_cta": [1], "order": [0] }"#;

fn copy_kernel(store_cache: &str) -> String {
    let tensor = |elem: &str| format!(r#"{{ "shape": [128], "elem": {}, "layout": {} }}"#, elem, BLOCKED);
    format!(
        r#"{{
    "num_warps": 1,
    "kernel": {{
        "name": "copy",
        "args": [
            {{ "id": 0, "ty": {{ "ptr": "f32" }}, "divisibility": 16 }},
            {{ "id": 1, "ty": {{ "ptr": "f32" }}, "divisibility": 16 }}
        ],
        "body": [
            {{ "result": 2, "op": "make_range", "start": 0, "end": 128, "ty": {i32} }},
            {{ "result": 3, "op": "splat", "src": 0, "ty": {ptr} }},
            {{ "result": 4, "op": "addptr", "ptr": 3, "offset": 2, "ty": {ptr} }},
            {{ "result": 5, "op": "splat", "src": 1, "ty": {ptr} }},
            {{ "result": 6, "op": "addptr", "ptr": 5, "offset": 2, "ty": {ptr} }},
            {{ "result": 7, "op": "load", "ptr": 4, "ty": {f32} }},
            {{ "op": "store", "ptr": 6, "value": 7, "cache": "{cache}", "loc": {{ "line": 4, "col": 5 }} }},
            {{ "op": "return" }}
        ]
    }}
}}"#,
        i32 = tensor(r#""i32""#),
        f32 = tensor(r#""f32""#),
        ptr = tensor(r#"{ "ptr": "f32" }"#),
        cache = store_cache,
    )
}

fn tile_lower(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_tile-lower"))
        .args(args)
        .env_remove("TILE_LOWER_LOG")
        .output()
        .expect("failed to run tile-lower")
}

fn write(dir: &Path, name: &str, text: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, text).unwrap();
    path.display().to_string()
}

#[test]
fn test_lower_writes_output_file() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "copy.json", &copy_kernel("none"));
    let output = dir.path().join("copy.ll");

    let out = tile_lower(&["lower", &input, "-o", &output.display().to_string()]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let text = std::fs::read_to_string(&output).unwrap();
    assert!(text.contains("global internal @global_smem"));
    assert!(text.contains("func @copy("));
    assert!(text.contains("nvvm.maxntid = 32 : i32"));
    assert!(text.contains("ld.global.v4.b32"));
    assert!(text.contains("st.global.v4.b32"));
}

#[test]
fn test_lower_prints_to_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "copy.json", &copy_kernel("cg"));
    let out = tile_lower(&["lower", &input, "--num-warps", "1"]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("st.global.cg.v4.b32"));
}

#[test]
fn test_unsupported_store_fails_with_diagnostic() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "copy.json", &copy_kernel("ca"));
    let out = tile_lower(&["lower", &input]);
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("cannot lower `store`"));
    assert!(stderr.contains("4:5"));
    assert!(stderr.contains("could not lower 'copy' (1 error)"));
}

#[test]
fn test_config_file_is_validated() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "copy.json", &copy_kernel("none"));
    let config = write(dir.path(), "options.json", r#"{ "smem_alignment": 12 }"#);
    let out = tile_lower(&["lower", &input, "--config", &config]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("smem_alignment"));
}

#[test]
fn test_warp_override_must_match_layouts() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "copy.json", &copy_kernel("none"));
    let out = tile_lower(&["lower", &input, "--num-warps", "2"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("spans 1 warps, kernel has 2"));
}

#[test]
fn test_malformed_module_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "bad.json", r#"{ "kernel": { "name": "k" } }"#);
    let out = tile_lower(&["lower", &input]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("is not a kernel module"));
}

#[test]
fn test_layout_single_thread() {
    let out = tile_lower(&[
        "layout",
        "--size-per-thread",
        "4",
        "--threads-per-warp",
        "32",
        "--warps-per-cta",
        "1",
        "--order",
        "0",
        "--shape",
        "128",
        "--thread",
        "31",
    ]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("4 elements per thread, 1 warps"));
    assert!(stdout.contains("thread 31: [124] [125] [126] [127]"));
}

#[test]
fn test_layout_all_threads_of_a_slice() {
    let out = tile_lower(&[
        "layout",
        "--size-per-thread",
        "1,1",
        "--threads-per-warp",
        "8,4",
        "--warps-per-cta",
        "1,1",
        "--order",
        "1,0",
        "--shape",
        "8",
        "--slice",
        "1",
    ]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.starts_with("#slice<{dim = 1"));
    // lanes along the sliced dimension hold the same row
    assert!(stdout.contains("thread 0: [0]"));
    assert!(stdout.contains("thread 3: [0]"));
    assert!(stdout.contains("thread 4: [1]"));
    assert_eq!(stdout.lines().filter(|l| l.starts_with("thread ")).count(), 32);
}

#[test]
fn test_layout_rejects_bad_warp_shape() {
    let out = tile_lower(&[
        "layout",
        "--size-per-thread",
        "1",
        "--threads-per-warp",
        "16",
        "--warps-per-cta",
        "1",
        "--order",
        "0",
        "--shape",
        "16",
    ]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("warp size"));
}

#[test]
fn test_layout_rejects_zero_extent_shape() {
    let out = tile_lower(&[
        "layout",
        "--size-per-thread",
        "1",
        "--threads-per-warp",
        "32",
        "--warps-per-cta",
        "1",
        "--order",
        "0",
        "--shape",
        "0",
    ]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("zero extent"));
}

#[test]
fn test_zero_extent_module_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "empty.json", &copy_kernel("none").replace("[128]", "[0]"));
    let out = tile_lower(&["lower", &input]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("is not a kernel module"));
}
