use std::path::Path;
use std::sync::Arc;

use gaia::{App, ApplicationError, CallError, Context, ControllerRegistry, ErrorFields, GaiaConfig};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

fn write_descriptor_set(
    root: &Path,
    name: &str,
    set: &prost_types::FileDescriptorSet,
) -> std::io::Result<()> {
    let proto = root.join("proto");
    std::fs::create_dir_all(&proto)?;
    std::fs::write(proto.join(name), gaia_testkit::encode_set(set))
}

struct Running {
    target: String,
    shutdown_tx: oneshot::Sender<()>,
    task: tokio::task::JoinHandle<Result<(), gaia::AppError>>,
}

impl Running {
    async fn start<S: Send + Sync + 'static>(app: App<S>) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(app.serve(listener, async move {
            let _ = shutdown_rx.await;
        }));
        Ok(Self {
            target: addr.to_string(),
            shutdown_tx,
            task,
        })
    }

    async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.task.await;
    }
}

fn greeter_controllers() -> ControllerRegistry<Context<()>> {
    ControllerRegistry::new("controllers").with(gaia_testkit::GREETER_SERVICE, |c| {
        c.method("say_hello", |_ctx, req: Value, _call| async move {
            match req["name"].as_str() {
                Some("") | None => {
                    Err(ApplicationError::new("no such user").with("code", "NOT_FOUND"))
                }
                Some(name) => Ok(json!({"greeting": format!("Hello {name}")})),
            }
        })
        .method("ping", |_ctx, _req, _call| async { Ok(json!({"greeting": "pong"})) })
        .method("count_letters", |_ctx, _req, _call| async { Ok(json!({"letters": 0})) })
    })
}

/// Billing.Charge relays to the remote greeter configured as `greeter`.
fn billing_controllers() -> ControllerRegistry<Context<String>> {
    ControllerRegistry::new("controllers").with("demo.beta.Billing", |c| {
        c.method("charge", |ctx: Arc<Context<String>>, _req, _call| async move {
            let Some(say_hello) = ctx
                .client("greeter", gaia_testkit::GREETER_SERVICE)
                .and_then(|client| client.get("say_hello"))
            else {
                return Err(ApplicationError::new("greeter not bound").with("code", "INTERNAL"));
            };

            match say_hello.call(json!({"name": ctx.state()})).await {
                Ok(_) => Ok(json!({})),
                Err(CallError::Application(err)) => Err(err),
                Err(CallError::Transport(status)) => Err(ApplicationError::new(
                    status.message().to_string(),
                )
                .with("code", "UNAVAILABLE")),
            }
        })
    })
}

async fn start_greeter(root: &Path) -> Result<Running, Box<dyn std::error::Error + Send + Sync>> {
    write_descriptor_set(root, "greeter.pb", &gaia_testkit::greeter_set())?;
    let config = GaiaConfig::from_yaml_str("protos: [greeter.pb]")?.resolve(root)?;
    let app = App::builder(config).controllers(greeter_controllers()).build()?;
    assert_eq!(app.services(), [gaia_testkit::GREETER_SERVICE]);
    Ok(Running::start(app).await?)
}

fn billing_config(
    root: &Path,
    greeter_host: &str,
) -> Result<gaia::ResolvedConfig, Box<dyn std::error::Error + Send + Sync>> {
    let remote = root.join("greeter");
    write_descriptor_set(&remote, "greeter.pb", &gaia_testkit::greeter_set())?;

    let beta = gaia_testkit::catalog_set()
        .file
        .into_iter()
        .filter(|f| f.name() == "beta.proto")
        .collect();
    write_descriptor_set(root, "beta.pb", &prost_types::FileDescriptorSet { file: beta })?;

    let yaml = format!(
        "
protos: [beta.pb]
services:
  greeter:
    host: '{greeter_host}'
    root: greeter
    protos: [greeter.pb]
"
    );
    Ok(GaiaConfig::from_yaml_str(&yaml)?.resolve(root)?)
}

#[tokio::test]
async fn e2e_app_relays_calls_and_errors_through_remote_service() -> TestResult {
    let greeter_dir = tempfile::tempdir()?;
    let greeter = start_greeter(greeter_dir.path()).await?;

    for (state, expected) in [("Ada", None), ("", Some("NOT_FOUND"))] {
        let billing_dir = tempfile::tempdir()?;
        let config = billing_config(billing_dir.path(), &greeter.target)?;
        let plan = config.protos.plan.clone();

        let app = App::builder(config)
            .state(state.to_string())
            .controllers(billing_controllers())
            .build()?;
        assert!(app.context().service("greeter").is_some());
        let billing = Running::start(app).await?;

        let clients = gaia_core::connect(&plan, &billing.target, &ErrorFields::default())?;
        let Some(charge) = clients
            .get("demo.beta.Billing")
            .and_then(|c| c.get("Charge"))
        else {
            panic!("expected Charge client");
        };

        let got = charge.call(json!({})).await;
        match (got, expected) {
            (Ok(v), None) => assert_eq!(v, json!({})),
            (Err(CallError::Application(err)), Some(code)) => {
                assert_eq!(err.code(), Some(code));
                assert_eq!(err.message(), "no such user");
            }
            (other, _) => panic!("unexpected result for {state:?}: {other:?}"),
        }

        billing.shutdown().await;
    }

    greeter.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn e2e_missing_controller_fails_the_build() -> TestResult {
    let dir = tempfile::tempdir()?;
    write_descriptor_set(dir.path(), "greeter.pb", &gaia_testkit::greeter_set())?;
    let config = GaiaConfig::from_yaml_str("protos: [greeter.pb]")?.resolve(dir.path())?;

    let got = App::builder(config)
        .controllers(ControllerRegistry::<Context<()>>::new("controllers"))
        .build();
    let Err(err) = got else {
        panic!("expected build failure");
    };
    assert!(matches!(err, gaia::AppError::Controllers(gaia_core::BindError::Resolve { .. })));
    Ok(())
}

#[tokio::test]
async fn e2e_unreachable_remote_is_a_transport_error_in_the_controller() -> TestResult {
    let unused = std::net::TcpListener::bind("127.0.0.1:0")?;
    let host = unused.local_addr()?.to_string();
    drop(unused);

    let dir = tempfile::tempdir()?;
    let config = billing_config(dir.path(), &host)?;
    let plan = config.protos.plan.clone();
    let app = App::builder(config)
        .state("Ada".to_string())
        .controllers(billing_controllers())
        .build()?;
    let billing = Running::start(app).await?;

    let clients = gaia_core::connect(&plan, &billing.target, &ErrorFields::default())?;
    let Some(charge) = clients
        .get("demo.beta.Billing")
        .and_then(|c| c.get("charge"))
    else {
        panic!("expected charge client");
    };

    let Err(err) = charge.call(json!({})).await else {
        panic!("expected failure");
    };
    assert_eq!(err.as_application().and_then(|e| e.code()), Some("UNAVAILABLE"));

    billing.shutdown().await;
    Ok(())
}
