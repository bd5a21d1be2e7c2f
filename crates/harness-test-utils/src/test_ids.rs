//! Fixed names for deterministic tests.

// Test class names
pub const TEST_CLASS_JRF: &str = "ItJrfImageWlst";
pub const TEST_CLASS_IMAGE_TOOL: &str = "ItImageTool";

// Cluster lease ids
pub const TEST_CLUSTER_ID: &str = "test-cluster";
pub const TEST_CLUSTER_ID_2: &str = "test-cluster-2";

// Chain step names, in creation order for the JRF class
pub const STEP_DATABASE: &str = "Database";
pub const STEP_RCU_SCHEMA: &str = "RcuSchema";
pub const STEP_OPERATOR: &str = "Operator";
pub const STEP_DOMAIN: &str = "Domain";

pub const JRF_STEPS: [&str; 4] = [STEP_DATABASE, STEP_RCU_SCHEMA, STEP_OPERATOR, STEP_DOMAIN];

// RCU
pub const TEST_RCU_PREFIX: &str = "jrfImage";
