//! Resource chains for each test class.
//!
//! A class's chain is a pure function of configuration and suffix, so the
//! same builder drives both the live run and the shape tests below.

use harness_core::{
    ChainError, DependencyChain, DomainInImage, DomainOnPv, HarnessConfig, ImageBuild,
    OperatorRelease, OracleDatabase, RcuSchema, Suffix,
};

pub const JRF_IMAGE_WLST: &str = "ItJrfImageWlst";
pub const IMAGE_TOOL: &str = "ItImageTool";

/// RCU schema prefix used by the JRF class.
pub const JRF_RCU_PREFIX: &str = "jrfImage";

/// Infrastructure image JRF domain images are built on.
pub const JRF_DOMAIN_IMAGE: &str = "container-registry.oracle.com/middleware/fmw-infrastructure:12.2.1.3";

/// Repository of the domain image the WLST sample builds, tagged per domain.
pub const JRF_BUILT_IMAGE: &str = "domain-home-in-image-wlst";

/// Database, schema, operator, and a two-server JRF domain wired to the
/// schema. The domain image is built with WLST on the infrastructure image.
pub fn jrf_image_wlst_chain(
    config: &HarnessConfig,
    suffix: Suffix,
) -> Result<DependencyChain, ChainError> {
    let scripts = config.sample_scripts_dir();
    let db = OracleDatabase::new(&scripts, suffix, &config.nodeport_host);
    let db_url = db.url();
    let schema = RcuSchema::new(&scripts, JRF_RCU_PREFIX, db_url.clone(), db.namespace());
    let operator = OperatorRelease::new(config.operator_chart_dir(), suffix);
    let wlst_script = scripts
        .join("create-fmw-infrastructure-domain")
        .join("domain-home-in-image")
        .join("create-domain.sh");
    let image = format!("{JRF_BUILT_IMAGE}:{}", suffix.domain_uid());
    let domain = DomainInImage::new(suffix, image, config.result_dir(JRF_IMAGE_WLST))
        .with_cluster("infra-cluster", 2)
        .with_managed_server_base("infraserver")
        .with_rcu(JRF_RCU_PREFIX, db_url)
        .with_wlst_image_build(wlst_script, JRF_DOMAIN_IMAGE);

    let mut chain = DependencyChain::new();
    let db = chain.add_step("Database", db, &[])?;
    let schema = chain.add_step("RcuSchema", schema, &[db])?;
    let operator = chain.add_step("Operator", operator, &[])?;
    chain.add_step("Domain", domain, &[schema, operator])?;
    Ok(chain)
}

/// Image built by the image tool, then an operator and a domain on a
/// persistent volume whose pods run that image.
pub fn image_tool_chain(
    config: &HarnessConfig,
    suffix: Suffix,
) -> Result<DependencyChain, ChainError> {
    let image = ImageBuild::new(config.image_build_script(), config.image.clone());
    let operator = OperatorRelease::new(config.operator_chart_dir(), suffix);
    let domain = DomainOnPv::new(
        config.sample_scripts_dir(),
        suffix,
        config.image.to_string(),
        config.result_dir(IMAGE_TOOL),
        &config.pv_root,
    );

    let mut chain = DependencyChain::new();
    let image = chain.add_step("Image", image, &[])?;
    let operator = chain.add_step("Operator", operator, &[])?;
    chain.add_step("Domain", domain, &[image, operator])?;
    Ok(chain)
}
