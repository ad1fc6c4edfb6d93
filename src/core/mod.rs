// ─── QuickMod Core ───
// Resolver and installer backend for QuickMod packages.
//
// Architecture:
//   core/
//     version/    — Version values, package refs, version constraints
//     quickmod/   — Package versions, relationships, descriptors, catalog
//     downloader/ — Download sources + fetch collaborator
//     cache/      — Checksum-verified content cache, single-flight fills
//     maven/      — Library coordinates
//     instance/   — Target environment + on-disk instance + deploy records
//     install/    — Install orchestrator and background tasks
//     settings    — Persisted resolver settings

pub mod cache;
pub mod downloader;
pub mod error;
pub mod http;
pub mod install;
pub mod instance;
pub mod locks;
pub mod maven;
pub mod quickmod;
pub mod settings;
pub mod version;
