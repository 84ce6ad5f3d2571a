//! CLI command definitions
//!
//! Defines the clap commands for the test harness CLI.

use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Create a test run from selected tests and follow it until it ends
    RunTests(RunTestsArgs),

    /// Abort the test run the backend is currently executing
    AbortTesting {
        /// Seconds to wait for the run to stop (default from config)
        #[arg(long)]
        timeout: Option<u64>,

        /// Print progress as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// List test run history, or show one run and its log
    TestRunExecution {
        /// Fetch a specific test run by ID
        #[arg(long, short = 'i')]
        id: Option<i64>,

        /// Skip the first N test runs, ordered by ID
        #[arg(long, short = 's')]
        skip: Option<u32>,

        /// Maximum number of test runs to fetch
        #[arg(long, short = 'l')]
        limit: Option<u32>,

        /// Fetch the log of the test run given by --id
        #[arg(long, requires = "id", conflicts_with_all = ["skip", "limit", "json"])]
        log: bool,

        /// Print the JSON response
        #[arg(long)]
        json: bool,
    },

    /// List the test collections the backend offers
    AvailableTests {
        /// Print JSON instead of YAML
        #[arg(long)]
        json: bool,
    },

    /// Show the state of the test runner
    TestRunnerStatus {
        /// Print the JSON response
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunTestsArgs {
    /// Project the test run belongs to
    #[arg(long, short = 'i')]
    pub project_id: i64,

    /// Name of the test run (default: current timestamp)
    #[arg(long, short = 'n')]
    pub title: Option<String>,

    /// Test cases to run, separated by commas: TC-ACE-1.1,TC_ACE_1_3
    #[arg(long, short = 't', value_delimiter = ',')]
    pub tests_list: Vec<String>,

    /// Selected tests as JSON: '{"collection":{"suite":{"TC-ACE-1.1": 1}}}'
    #[arg(long, short = 's', conflicts_with = "file")]
    pub selected_tests: Option<String>,

    /// File holding the selected tests JSON
    #[arg(long, short = 'f')]
    pub file: Option<PathBuf>,

    /// Capability declaration file or directory (PICS XML or YAML); repeatable
    #[arg(long, short = 'p')]
    pub pics: Vec<PathBuf>,

    /// Properties file with run settings and test parameters; repeatable
    #[arg(long, short = 'c')]
    pub config: Vec<PathBuf>,

    /// Override one property: path=value; repeatable
    #[arg(long = "set", value_name = "PATH=VALUE")]
    pub set: Vec<String>,

    /// Override one capability: ID=true|false; repeatable
    #[arg(long = "capability", value_name = "ID=BOOL")]
    pub capability: Vec<String>,

    /// Give up following the run after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Print progress as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Also print backend log lines
    #[arg(long, short = 'v')]
    pub verbose: bool,
}
