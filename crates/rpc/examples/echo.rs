//! Main and extension host talking over a framed byte stream.
//!
//! The extension side hosts a `commands` service; the main side drives it
//! through a hand-written typed stub.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use exthost_rpc::handler::{arg, respond};
use exthost_rpc::{
    IdentifierTable, MethodRouter, PendingCall, Proxy, RpcConfig, RpcProtocol, Side, well_known,
};
use exthost_transport::TransportConfig;
use exthost_transport_stream::DuplexChannel;
use tracing::info;

/// Typed client for the extension-side `commands` service.
#[derive(Clone, Debug)]
struct CommandsClient {
    proxy: Proxy,
}

impl CommandsClient {
    const fn new(proxy: Proxy) -> Self {
        Self { proxy }
    }

    fn echo(&self, text: &str) -> PendingCall<String> {
        self.proxy.call("echo", (text,))
    }

    fn execute(&self, command: &str, args: Vec<String>) -> PendingCall<Option<String>> {
        self.proxy.call("execute", (command, args))
    }

    fn sleep(&self, millis: u64) -> PendingCall<()> {
        self.proxy.call("sleep", (millis,))
    }
}

fn commands_service() -> MethodRouter {
    MethodRouter::new()
        .method("echo", |args, _cx| async move {
            let text: String = arg(&args, 0)?;
            respond(text)
        })
        .method("execute", |args, _cx| async move {
            let command: String = arg(&args, 0)?;
            let args: Vec<String> = arg(&args, 1)?;
            match command.as_str() {
                "editor.action.join" => respond(Some(args.join(" "))),
                _ => respond(None::<String>),
            }
        })
        .cancellable_method("sleep", |args, _cx| async move {
            let millis: u64 = arg(&args, 0)?;
            tokio::time::sleep(Duration::from_millis(millis)).await;
            respond(())
        })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let (main_end, ext_end) = DuplexChannel::connect_pair(&TransportConfig::default());
    let main_side = RpcProtocol::open(Arc::new(main_end), RpcConfig::main());
    let ext_side = RpcProtocol::open(
        Arc::new(ext_end),
        RpcConfig::ext().with_request_timeout(Duration::from_secs(5)),
    );

    let table = IdentifierTable::well_known();
    let commands = table
        .get(Side::Ext, well_known::COMMANDS)
        .cloned()
        .context("commands identifier missing")?;

    ext_side.set(&commands, commands_service())?;
    let client = CommandsClient::new(main_side.get_proxy(&commands)?);

    let echoed = client.echo("hello from main").await?;
    info!("echo replied: {}", echoed);

    let joined = client
        .execute("editor.action.join", vec!["a".into(), "b".into()])
        .await?;
    info!("execute replied: {:?}", joined);

    let slow = client.sleep(10_000);
    slow.cancel();
    info!("sleep cancelled: {:?}", slow.await);

    main_side.close().await;
    ext_side.wait().await;
    info!("both sides closed");

    Ok(())
}
