// ─── Prestarter Core ───
// Makes sure a JDK and the OpenJFX runtime are installed before the
// launcher starts.
//
// Architecture:
//   core/
//     platform.rs    : host OS/architecture and catalog spellings
//     version.rs     : runtime versions, constraints, build selection
//     source/        : RuntimeSource trait, Adoptium + OpenJFX, archives
//     downloader/    : cancellable downloads with SHA-256 validation
//     composite.rs   : ordered all-or-nothing acquisition
//     cache.rs       : manifest of committed runtimes per install root
//     lock.rs        : cross-process install lock
//     orchestrator.rs: ensure/describe, retries, confirmation gate
//     layout.rs      : java binary, module path, launcher hand-off
//     config.rs / paths.rs / http.rs / error.rs

pub mod cache;
pub mod composite;
pub mod config;
pub mod downloader;
pub mod error;
pub mod http;
pub mod layout;
pub mod lock;
pub mod orchestrator;
pub mod paths;
pub mod platform;
pub mod source;
pub mod version;

#[cfg(test)]
pub(crate) mod testing;
