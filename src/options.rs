//! Flags of the protocol methods, grouped per method.

use serde::{Deserialize, Serialize};

macro_rules! options {
    ($($(#[$doc:meta])* $name:ident { $($(#[$fdoc:meta])* $field:ident),* $(,)? })*) => {
        $(
            $(#[$doc])*
            #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
            #[serde(default)]
            pub struct $name {
                $($(#[$fdoc])* pub $field: bool,)*
            }
        )*
    };
}

options! {
    ExchangeDeclareOptions {
        /// Only check that the exchange exists. Passive declarations are never recorded.
        passive,
        durable,
        auto_delete,
        internal,
        nowait,
    }
    ExchangeDeleteOptions { if_unused, nowait }
    ExchangeBindOptions { nowait }
    ExchangeUnbindOptions { nowait }
    QueueDeclareOptions {
        /// Only check that the queue exists. Passive declarations are never recorded.
        passive,
        durable,
        exclusive,
        auto_delete,
        nowait,
    }
    QueueBindOptions { nowait }
    QueueUnbindOptions {}
    QueuePurgeOptions { nowait }
    QueueDeleteOptions { if_unused, if_empty, nowait }
    BasicQosOptions {
        /// Apply to the whole connection instead of each new consumer on the channel.
        global,
    }
    BasicConsumeOptions { no_local, no_ack, exclusive, nowait }
    BasicCancelOptions { nowait }
    BasicPublishOptions {
        /// Have the server return the message if it cannot be routed to any queue.
        mandatory,
        immediate,
    }
    BasicGetOptions { no_ack }
    BasicAckOptions {
        /// Acknowledge every outstanding delivery up to this one.
        multiple,
    }
    BasicNackOptions { multiple, requeue }
    BasicRejectOptions { requeue }
    BasicRecoverOptions { requeue }
    ConfirmSelectOptions { nowait }
}
