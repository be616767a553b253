//! 流式写入桥
//!
//! 后端的写请求在独立任务中执行，数据生产方在调用方任务中并发写入，
//! 两者通过两个一次性信号同步：
//!
//! - `entry`：请求开始消费请求体，`sink()` 返回可写入的 [`BodySink`]；
//! - `exit`：请求任务结束，`response()` 返回后端响应或请求侧的错误。
//!
//! 请求体从未被读取（零字节、请求提前失败）时，完成路径仍会触发 `entry`，
//! 等待方不会死锁。生产方出错时用 [`BodySink::abort`] 让请求以错误结束，
//! 而不是把截断的内容当作完整数据提交。

use crate::error::{Result, TransferError};
use bytes::Bytes;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

/// 一次性信号，重复触发无副作用
#[derive(Clone)]
struct Signal(Arc<Mutex<Option<oneshot::Sender<()>>>>);

impl Signal {
    fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self(Arc::new(Mutex::new(Some(tx)))), rx)
    }

    fn fire(&self) {
        let sender = self.0.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }
}

/// 请求任务读取的请求体，首次被轮询时触发 `entry`
pub struct RequestBody {
    chunks: ReceiverStream<Result<Bytes>>,
    entry: Signal,
}

impl Stream for RequestBody {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Bytes>>> {
        let this = self.get_mut();
        this.entry.fire();
        Pin::new(&mut this.chunks).poll_next(cx)
    }
}

/// 生产方写入端，丢弃即关闭请求体
pub struct BodySink {
    path: String,
    tx: mpsc::Sender<Result<Bytes>>,
}

impl BodySink {
    pub async fn write(&self, data: Bytes) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.tx
            .send(Ok(data))
            .await
            .map_err(|_| TransferError::transport(&self.path, "写请求已提前结束"))
    }

    pub fn close(self) {}

    /// 以错误结束请求体，请求不会提交已写入的部分
    pub async fn abort(self, reason: &TransferError) {
        let error = TransferError::transport(&self.path, format!("写入中止: {}", reason));
        let _ = self.tx.send(Err(error)).await;
    }
}

pub struct StreamingBridge<R> {
    path: String,
    sink: Option<mpsc::Sender<Result<Bytes>>>,
    entry: Option<oneshot::Receiver<()>>,
    exit: JoinHandle<Result<R>>,
}

impl<R: Send + 'static> StreamingBridge<R> {
    /// 在独立任务中发起写请求。`buffer` 为请求体通道可缓冲的块数
    pub fn spawn<F, Fut>(path: &str, buffer: usize, request: F) -> Self
    where
        F: FnOnce(RequestBody) -> Fut + Send + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let (entry, entry_rx) = Signal::new();
        let body = RequestBody {
            chunks: ReceiverStream::new(rx),
            entry: entry.clone(),
        };
        let exit = tokio::spawn(async move {
            let result = request(body).await;
            entry.fire();
            result
        });
        Self {
            path: path.to_string(),
            sink: Some(tx),
            entry: Some(entry_rx),
            exit,
        }
    }

    /// 等待请求开始读取请求体后返回写入端
    pub async fn sink(&mut self) -> Result<BodySink> {
        if let Some(entry) = self.entry.take() {
            // 发送方被丢弃只可能发生在任务崩溃时，交给 response() 报告
            let _ = entry.await;
        }
        let tx = self
            .sink
            .take()
            .ok_or_else(|| TransferError::protocol(&self.path, "写入端已被取走"))?;
        Ok(BodySink {
            path: self.path.clone(),
            tx,
        })
    }

    /// 关闭尚未取走的写入端，等待请求结束并返回响应
    pub async fn response(mut self) -> Result<R> {
        self.sink.take();
        match self.exit.await {
            Ok(result) => result,
            Err(e) => {
                debug!("写请求任务异常结束: {} ({})", self.path, e);
                Err(TransferError::transport(&self.path, e.to_string()))
            }
        }
    }
}
