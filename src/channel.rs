use derive_more::Constructor;
use std::fmt::Debug;
use tokio::sync::mpsc;

/// 通道发送端的抽象，使组件可以对异步/同步通道实现保持泛型。
pub trait Tx
where
    Self: Debug + Clone + Send,
{
    /// 通过通道发送的消息类型。
    type Item;

    /// 发送一条消息。
    ///
    /// 如果接收端已被丢弃，返回未能投递的消息。
    fn send<Item>(&self, item: Item) -> Result<(), SendError<Self::Item>>
    where
        Item: Into<Self::Item>;
}

/// 发送失败时返回的错误，携带未能投递的消息。
#[derive(Debug, Clone, PartialEq, Eq, Constructor)]
pub struct SendError<Item>(pub Item);

impl<Item> std::fmt::Display for SendError<Item> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "receiver dropped before send completed")
    }
}

impl<Item> std::error::Error for SendError<Item> where Item: Debug {}

/// 无界 [`Tx`] 实现，包装 [`tokio::sync::mpsc::UnboundedSender`]。
#[derive(Debug)]
pub struct UnboundedTx<Item> {
    /// 内部 tokio 发送端。
    pub tx: mpsc::UnboundedSender<Item>,
}

impl<Item> Clone for UnboundedTx<Item> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<Item> Tx for UnboundedTx<Item>
where
    Item: Debug + Send,
{
    type Item = Item;

    fn send<ItemIn>(&self, item: ItemIn) -> Result<(), SendError<Item>>
    where
        ItemIn: Into<Item>,
    {
        self.tx.send(item.into()).map_err(|err| SendError(err.0))
    }
}

/// 无界通道，返回 ([`UnboundedTx`], [`mpsc::UnboundedReceiver`]) 对。
pub fn mpsc_unbounded<Item>() -> (UnboundedTx<Item>, mpsc::UnboundedReceiver<Item>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (UnboundedTx { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_tx_send_and_receive() {
        let (tx, mut rx) = mpsc_unbounded::<u64>();
        tx.send(1u64).unwrap();
        tx.send(2u64).unwrap();
        assert_eq!(rx.try_recv().unwrap(), 1);
        assert_eq!(rx.try_recv().unwrap(), 2);
    }

    #[test]
    fn test_unbounded_tx_send_after_receiver_dropped() {
        let (tx, rx) = mpsc_unbounded::<u64>();
        drop(rx);
        assert_eq!(tx.send(7u64), Err(SendError(7)));
    }
}
