use async_trait::async_trait;
use split_dns_lib::DnsPacket;

use crate::RequestState;

/// Destination of the final response of a request
#[async_trait]
pub trait ResponseWriter: Send {
    async fn write_msg(&mut self, msg: DnsPacket<'static>) -> anyhow::Result<()>;
}

/// A link in the serving chain. Each handler either writes a response itself or passes
/// a (possibly wrapped) writer to the next one.
#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn serve_dns(
        &self,
        state: &RequestState,
        writer: &mut dyn ResponseWriter,
    ) -> anyhow::Result<()>;
}

/// Keeps the written message in memory instead of sending it anywhere
#[derive(Debug, Default)]
pub struct BufferedWriter {
    msg: Option<DnsPacket<'static>>,
}

impl BufferedWriter {
    pub fn into_msg(self) -> Option<DnsPacket<'static>> {
        self.msg
    }
}

#[async_trait]
impl ResponseWriter for BufferedWriter {
    async fn write_msg(&mut self, msg: DnsPacket<'static>) -> anyhow::Result<()> {
        if self.msg.replace(msg).is_some() {
            anyhow::bail!("bug: response was written twice");
        }
        Ok(())
    }
}
