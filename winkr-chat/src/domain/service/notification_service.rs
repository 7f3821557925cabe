//! 通知扇出
//!
//! 至多一次、尽力而为：推送失败只记录日志，持久化状态才是事实来源。

use tracing::{debug, instrument, warn};
use winkr_core::RequestContext;

use crate::domain::model::PhotoEvent;
use crate::domain::repository::PushChannelRef;

#[derive(Clone)]
pub struct NotificationFanout {
    push: PushChannelRef,
}

impl NotificationFanout {
    pub fn new(push: PushChannelRef) -> Self {
        Self { push }
    }

    /// 发送事件给照片所有者；返回是否投递成功，失败不会向上传播
    #[instrument(skip(self, ctx, event), fields(
        request_id = %ctx.request_id(),
        event_type = event.event_type.as_str(),
        photo_id = %event.photo_id,
    ))]
    pub async fn publish(&self, ctx: &RequestContext, event: &PhotoEvent) -> bool {
        if ctx.is_cancelled() {
            debug!("skip notification, request cancelled");
            return false;
        }
        let payload = event.to_payload();
        match ctx
            .run(self.push.broadcast_to_user(&event.owner_id, &payload))
            .await
        {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                warn!(owner_id = %event.owner_id, error = %err, "failed to push photo event");
                false
            }
            Err(err) => {
                warn!(owner_id = %event.owner_id, error = %err, "photo event push interrupted");
                false
            }
        }
    }
}
