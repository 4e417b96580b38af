// ABOUTME: Validation utilities for task input
// ABOUTME: Task ids, project file paths and capture routes, with directory-traversal guards

use std::path::{Component, Path};

/// Validates a task ID.
///
/// Task ids end up in workspace directory names, container names and artifact
/// paths, so they must be non-empty, short, free of path separators and `..`,
/// and free of control characters.
///
/// # Examples
///
/// ```
/// use labrun_sandbox::validation::validate_task_id;
///
/// assert!(validate_task_id("task-1").is_ok());
/// assert!(validate_task_id("").is_err());
/// assert!(validate_task_id("../etc").is_err());
/// ```
pub fn validate_task_id(task_id: &str) -> Result<(), String> {
    if task_id.is_empty() {
        return Err("Task ID cannot be empty".to_string());
    }

    if task_id.len() > 128 {
        return Err(format!(
            "Invalid task ID: {} characters exceeds the 128 character limit",
            task_id.len()
        ));
    }

    if task_id.contains("..") {
        return Err(format!(
            "Invalid task ID '{}': contains path traversal sequence",
            task_id
        ));
    }

    if task_id.contains('/') || task_id.contains('\\') {
        return Err(format!(
            "Invalid task ID '{}': contains path separator",
            task_id
        ));
    }

    if task_id.chars().any(|c| c.is_control()) {
        return Err(format!(
            "Invalid task ID '{}': contains control characters",
            task_id.escape_default()
        ));
    }

    Ok(())
}

/// Validates a project file path.
///
/// The path must be relative and made only of normal components: no root, no
/// drive prefix, no `.` or `..` segments, no NUL bytes or control characters.
pub fn validate_project_path(path: &str) -> Result<(), String> {
    if path.trim().is_empty() {
        return Err("File path cannot be empty".to_string());
    }

    if path.chars().any(|c| c.is_control()) {
        return Err(format!(
            "Invalid file path '{}': contains control characters",
            path.escape_default()
        ));
    }

    if path.contains('\\') {
        return Err(format!(
            "Invalid file path '{}': use '/' as the separator",
            path
        ));
    }

    for component in Path::new(path).components() {
        match component {
            Component::Normal(_) => {}
            Component::ParentDir => {
                return Err(format!(
                    "Invalid file path '{}': contains path traversal sequence",
                    path
                ))
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(format!("Invalid file path '{}': must be relative", path))
            }
            Component::CurDir => {
                return Err(format!(
                    "Invalid file path '{}': '.' segments are not allowed",
                    path
                ))
            }
        }
    }

    if path.ends_with('/') {
        return Err(format!("Invalid file path '{}': names a directory", path));
    }

    Ok(())
}

/// Validates a capture route. Routes are URL paths and must start with `/`.
pub fn validate_route(route: &str) -> Result<(), String> {
    if !route.starts_with('/') {
        return Err(format!("Invalid route '{}': must start with '/'", route));
    }

    if route.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(format!(
            "Invalid route '{}': contains whitespace or control characters",
            route.escape_default()
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_task_ids() {
        assert!(validate_task_id("task-1").is_ok());
        assert!(validate_task_id("lab_3.question_2").is_ok());
        assert!(validate_task_id("abc123").is_ok());
    }

    #[test]
    fn test_task_id_rejects_traversal_and_separators() {
        assert!(validate_task_id("..").is_err());
        assert!(validate_task_id("a/b").is_err());
        assert!(validate_task_id("a\\b").is_err());
        assert!(validate_task_id("line\nbreak").is_err());
        assert!(validate_task_id(&"x".repeat(129)).is_err());
    }

    #[test]
    fn test_valid_project_paths() {
        assert!(validate_project_path("index.js").is_ok());
        assert!(validate_project_path("src/pages/about.jsx").is_ok());
        assert!(validate_project_path("public/.nojekyll").is_ok());
    }

    #[test]
    fn test_project_path_traversal() {
        assert!(validate_project_path("../secret").is_err());
        assert!(validate_project_path("src/../../secret").is_err());
        assert!(validate_project_path("/etc/passwd").is_err());
        assert!(validate_project_path("./index.js").is_err());
    }

    #[test]
    fn test_project_path_rejects_odd_names() {
        assert!(validate_project_path("").is_err());
        assert!(validate_project_path("   ").is_err());
        assert!(validate_project_path("nul\0byte.js").is_err());
        assert!(validate_project_path("win\\style.js").is_err());
        assert!(validate_project_path("src/").is_err());
    }

    #[test]
    fn test_routes() {
        assert!(validate_route("/").is_ok());
        assert!(validate_route("/about?tab=1").is_ok());
        assert!(validate_route("about").is_err());
        assert!(validate_route("/a b").is_err());
    }
}
