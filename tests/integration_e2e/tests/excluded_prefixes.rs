// Excluded-prefixes collector scenarios. They expect a kind cluster built by
// kubeadm and the collector image available to it.
// Enable via: cargo test -p integration-e2e --test excluded_prefixes -- --ignored

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use envconfig::Envconfig;
use integration_e2e::{
    CollectorExtension, LogsExtension, Suite, SuiteConfig, deploy_collector,
    fixtures_dir, init_tracing,
};
use nsm_k8s::{Kubectl, SharedClient};
use nsm_prefixes::{
    CollectorConfig, Normalization, PrefixSet, Reconciler, UserConfig,
    env_prefixes, load_config_map,
};
use tokio::sync::Mutex;
use tracing::warn;

const SUITE: &str = "ExcludedPrefixesSuite";

// Every scenario shares the collector namespace.
static SERIAL: Mutex<()> = Mutex::const_new(());

struct Harness {
    suite: Suite,
    scenario: Scenario,
}

struct Scenario {
    reconciler: Reconciler,
    fixtures: PathBuf,
}

impl Scenario {
    fn config(&self) -> &CollectorConfig {
        self.reconciler.config()
    }

    async fn deploy(&self, env: Option<&PrefixSet>, wait: bool) -> Result<()> {
        deploy_collector(
            self.reconciler.client(),
            &self.fixtures,
            self.config(),
            env,
            wait,
        )
        .await?;
        Ok(())
    }

    fn user_config(&self) -> Result<UserConfig> {
        let path = self.fixtures.join("userConfigMap.yaml");
        let template = load_config_map(&path)?;
        Ok(UserConfig::new(self.reconciler.client().clone(), template))
    }
}

/// `None` when no cluster is reachable; the scenario is skipped.
async fn harness() -> Option<Harness> {
    init_tracing("info,nsm_prefixes=debug");
    let client = match SharedClient::new().get().await {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "no cluster available, skipping");
            return None;
        }
    };
    let suite_config = SuiteConfig::init_from_env().ok()?;
    let config = CollectorConfig::init_from_env().ok()?;
    let kubectl = Kubectl::new().with_kubeconfig(nsm_k8s::kubeconfig_path());
    let fixtures = fixtures_dir();
    let suite = Suite::new(SUITE).with(LogsExtension::new(SUITE)).with(
        CollectorExtension::new(
            client.clone(),
            kubectl.clone(),
            config.clone(),
            &fixtures,
        )
        .keep_resources(suite_config.no_cleanup),
    );
    Some(Harness {
        suite,
        scenario: Scenario {
            reconciler: Reconciler::new(client, kubectl, config),
            fixtures,
        },
    })
}

fn prefixes(items: &[&str]) -> PrefixSet {
    items.iter().collect()
}

fn env_layer() -> PrefixSet {
    env_prefixes("127.0.0.0/8,134.65.0.0/16")
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
#[ignore]
async fn kubeadm_prefixes_only() -> Result<()> {
    let _serial = SERIAL.lock().await;
    let Some(mut h) = harness().await else {
        return Ok(());
    };
    h.suite.setup().await?;
    let s = &h.scenario;
    let result = h
        .suite
        .run_test("TestWithKubeAdmConfigPrefixes", || async {
            // Output of an earlier collector must not satisfy this one.
            anyhow::ensure!(
                s.reconciler.observe().await.is_err(),
                "prefix file present before the collector started"
            );
            s.deploy(None, true).await?;
            let expected = s
                .reconciler
                .expected(&PrefixSet::new(), &PrefixSet::new())
                .await?;
            s.reconciler.wait_converged(&expected).await?;
            Ok(())
        })
        .await;
    h.suite.teardown().await?;
    result
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
#[ignore]
async fn user_config_create_update_delete() -> Result<()> {
    let _serial = SERIAL.lock().await;
    let Some(mut h) = harness().await else {
        return Ok(());
    };
    h.suite.setup().await?;
    let s = &h.scenario;
    let result = h
        .suite
        .run_test("TestWithUserConfigPrefixes", || async {
            s.deploy(None, true).await?;
            let none = PrefixSet::new();
            let mut user = s.user_config()?;

            let created = user.create().await?;
            let expected = s.reconciler.expected(&none, &created).await?;
            s.reconciler.wait_converged(&expected).await?;

            let whole_space = prefixes(&["128.0.0.0/1", "0.0.0.0/1"]);
            let updated = user.update(&whole_space).await?;
            let expected = s.reconciler.expected(&none, &updated).await?;
            if s.config().normalization == Normalization::Coalesce {
                assert_eq!(expected, prefixes(&["0.0.0.0/0"]));
            }
            s.reconciler.wait_converged(&expected).await?;

            user.delete().await?;
            let remaining = user.prefixes()?;
            let expected = s.reconciler.expected(&none, &remaining).await?;
            s.reconciler
                .wait_converged(&expected)
                .await
                .context("collector kept user prefixes after deletion")?;
            Ok(())
        })
        .await;
    h.suite.teardown().await?;
    result
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
#[ignore]
async fn all_prefix_layers() -> Result<()> {
    let _serial = SERIAL.lock().await;
    let Some(mut h) = harness().await else {
        return Ok(());
    };
    h.suite.setup().await?;
    let s = &h.scenario;
    let result = h
        .suite
        .run_test("TestWithAllPrefixes", || async {
            let env = env_layer();
            s.deploy(Some(&env), true).await?;
            let mut user = s.user_config()?;
            let created = user.create().await?;
            let outcome = async {
                let expected = s.reconciler.expected(&env, &created).await?;
                s.reconciler.wait_converged(&expected).await?;
                Ok::<_, anyhow::Error>(())
            }
            .await;
            user.delete().await?;
            outcome
        })
        .await;
    h.suite.teardown().await?;
    result
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
#[ignore]
async fn correct_env_prefixes() -> Result<()> {
    let _serial = SERIAL.lock().await;
    let Some(mut h) = harness().await else {
        return Ok(());
    };
    h.suite.setup().await?;
    let s = &h.scenario;
    let result = h
        .suite
        .run_test("TestWithCorrectEnvPrefixes", || async {
            anyhow::ensure!(
                s.reconciler.observe().await.is_err(),
                "prefix file present before the collector started"
            );
            let env = env_layer();
            s.deploy(Some(&env), true).await?;
            let expected =
                s.reconciler.expected(&env, &PrefixSet::new()).await?;
            s.reconciler.wait_converged(&expected).await?;
            Ok(())
        })
        .await;
    h.suite.teardown().await?;
    result
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
#[ignore]
async fn incorrect_env_prefixes() -> Result<()> {
    let _serial = SERIAL.lock().await;
    let Some(mut h) = harness().await else {
        return Ok(());
    };
    h.suite.setup().await?;
    let s = &h.scenario;
    let result = h
        .suite
        .run_test("TestWithIncorrectEnvPrefixes", || async {
            let env = prefixes(&["256.256.256.0"]);
            assert!(env.validate().is_err());
            s.deploy(Some(&env), false).await?;
            let selector = format!("app={}", s.config().collector_app);
            s.reconciler
                .expect_never_ready(&selector, Duration::from_secs(15))
                .await?;
            Ok(())
        })
        .await;
    h.suite.teardown().await?;
    result
}
