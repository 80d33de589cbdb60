use async_trait::async_trait;
use crate::error::Result;
use crate::types::Mirror;

/// MirrorSource: 所有镜像列表来源必须实现的接口
///
/// The ranking engine does not care where mirrors come from; a source only
/// has to produce the list.
#[async_trait]
pub trait MirrorSource: Sync + Send {
    /// 发行版名称 (如 "Ubuntu")
    fn name(&self) -> &str;

    /// 获取镜像列表
    async fn mirrors(&self) -> Result<Vec<Mirror>>;
}
