//! Application-wide constants
//!
//! Defaults for every configuration value, grouped by pipeline stage.

// =============================================================================
// TOOLCHAIN DEFAULTS
// =============================================================================

/// Shell used for free-form command strings
pub const DEFAULT_SHELL: &str = "/bin/bash";

/// Pinned C compiler
pub const DEFAULT_C_COMPILER: &str = "/usr/bin/gcc";

/// Pinned C++ compiler
pub const DEFAULT_CXX_COMPILER: &str = "/usr/bin/g++";

/// Command names redirected to the pinned C compiler
pub const C_COMPILER_NAMES: &[&str] = &["cc", "gcc", "clang"];

/// Command names redirected to the pinned C++ compiler
pub const CXX_COMPILER_NAMES: &[&str] = &["c++", "g++", "clang++"];

/// Commands stubbed out for submission-controlled processes
pub const DEFAULT_DISABLED_COMMANDS: &[&str] = &["curl", "wget", "ssh", "scp", "sudo", "git"];

// =============================================================================
// BUILD DEFAULTS
// =============================================================================

/// Best-effort clean step
pub const DEFAULT_CLEAN_COMMAND: &str = "make clean";

/// Build step
pub const DEFAULT_BUILD_COMMAND: &str = "make";

/// Executable name recognized before any other
pub const DEFAULT_BINARY_NAME: &str = "a.out";

/// Build and assemble timeout in seconds
pub const DEFAULT_BUILD_TIMEOUT_SECS: u64 = 120;

// =============================================================================
// EXECUTION DEFAULTS
// =============================================================================

/// Wall-clock limit for each run of submission-derived code
pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 10;

/// Time between SIGTERM and SIGKILL
pub const DEFAULT_KILL_GRACE_MS: u64 = 500;

/// Cap on captured stdout+stderr per command
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1024 * 1024; // 1 MB

/// Cap on diagnostics kept per outcome or stage failure
pub const DEFAULT_DIAGNOSTIC_LIMIT_BYTES: usize = 4 * 1024;

/// Assembler for the generated artifact
pub const DEFAULT_ASSEMBLER: &str = "/usr/bin/gcc";

/// Line-oriented diff program
pub const DEFAULT_DIFF_PROGRAM: &str = "diff";

/// Exit code reported for a command killed by the timeout
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit code reported for a program that exists but cannot be executed
pub const NOT_EXECUTABLE_EXIT_CODE: i32 = 126;

/// Exit code reported for a program that cannot be found
pub const NOT_FOUND_EXIT_CODE: i32 = 127;

// =============================================================================
// SCORING & IDENTIFIERS
// =============================================================================

/// Points awarded per passing fixture
pub const DEFAULT_POINTS_PER_PASS: f64 = 0.5;

/// Roll-number pattern: two letters, two digits, one letter, three digits
pub const DEFAULT_IDENTIFIER_PATTERN: &str =
    r"(?i)(?:^|[^a-z0-9])([a-z]{2}[0-9]{2}[a-z][0-9]{3})(?:[^a-z0-9]|$)";

/// Scratch directory created inside each working tree
pub const SCRATCH_DIR_NAME: &str = ".autograder";
