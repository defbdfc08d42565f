//! Solidity event definitions and the closed set of events the pipeline decodes.
//!
//! Events are grouped the way contracts expose them ([`EventGroup`]); a poller watches one or more
//! groups. Decoding turns a log into an [`EventKind`] once, so formatters match on variants instead
//! of comparing event names.

use alloy::{
    primitives::{Address, LogData},
    sol_types::{self, SolEvent},
};

use crate::types::CorrelationKey;

/// Beanstalk diamond: silo, field, convert and Tractor events.
pub mod beanstalk {
    alloy::sol! {
        #![sol(all_derives)]

        event Sow(address indexed account, uint256 fieldId, uint256 index, uint256 beans, uint256 pods);
        event Harvest(address indexed account, uint256 fieldId, uint256[] plots, uint256 beans);
        event AddDeposit(address indexed account, address indexed token, int96 stem, uint256 amount, uint256 bdv);
        event RemoveDeposit(address indexed account, address indexed token, int96 stem, uint256 amount, uint256 bdv);
        event RemoveDeposits(address indexed account, address indexed token, int96[] stems, uint256[] amounts, uint256 amount, uint256[] bdvs);
        event Convert(address indexed account, address fromToken, address toToken, uint256 fromAmount, uint256 toAmount);
        event ConvertDownPenalty(address account, uint256 grownStalkLost, uint256 grownStalkKept);
        event CancelBlueprint(bytes32 blueprintHash);
        event TractorExecutionBegan(address indexed operator, address indexed publisher, bytes32 indexed blueprintHash, uint256 nonce, uint256 gasleft);
        event Tractor(address indexed operator, address indexed publisher, bytes32 indexed blueprintHash, uint256 nonce, uint256 gasleft);
        event Chop(address indexed account, address indexed token, uint256 amount, uint256 underlying);
        event Plant(address indexed account, uint256 beans);
        event Pick(address indexed account, address indexed token, uint256 amount);
        event ClaimFertilizer(uint256[] ids, uint256 beans);
        event L1DepositsMigrated(address indexed owner, address indexed receiver, uint256[] depositIds, uint256[] amounts, uint256[] bdvs);
    }
}

/// Season lifecycle events emitted on sunrise.
pub mod season {
    alloy::sol! {
        #![sol(all_derives)]

        event Sunrise(uint256 indexed season);
        event SeasonOfPlentyWell(uint256 indexed season, address well, address token, uint256 amount);
        event SeasonOfPlentyField(uint256 toField);
    }
}

/// Pod marketplace events.
pub mod market {
    alloy::sol! {
        #![sol(all_derives)]

        event PodListingCreated(address indexed lister, uint256 fieldId, uint256 index, uint256 start, uint256 podAmount, uint24 pricePerPod, uint256 maxHarvestableIndex, uint256 minFillAmount, uint8 mode);
        event PodListingFilled(address indexed filler, address indexed lister, uint256 fieldId, uint256 index, uint256 start, uint256 podAmount, uint256 costInBeans);
        event PodListingCancelled(address indexed lister, uint256 fieldId, uint256 index);
        event PodOrderCreated(address indexed orderer, bytes32 id, uint256 beanAmount, uint256 fieldId, uint24 pricePerPod, uint256 maxPlaceInLine, uint256 minFillAmount);
        event PodOrderFilled(address indexed filler, address indexed orderer, bytes32 id, uint256 fieldId, uint256 index, uint256 start, uint256 podAmount, uint256 costInBeans);
        event PodOrderCancelled(address indexed orderer, bytes32 id);
    }
}

/// Basin well events.
pub mod well {
    alloy::sol! {
        #![sol(all_derives)]

        event Swap(address fromToken, address toToken, uint256 amountIn, uint256 amountOut, address recipient);
        event AddLiquidity(uint256[] tokenAmountsIn, uint256 lpAmountOut, address recipient);
        event RemoveLiquidity(uint256 lpAmountIn, uint256[] tokenAmountsOut, address recipient);
        event RemoveLiquidityOneToken(uint256 lpAmountIn, address tokenOut, uint256 tokenAmountOut, address recipient);
        event Shift(uint256[] reserves, address toToken, uint256 amountOut, address recipient);
    }
}

/// Fertilizer (ERC-1155) events.
pub mod fertilizer {
    alloy::sol! {
        #![sol(all_derives)]

        event TransferSingle(address indexed operator, address indexed from, address indexed to, uint256 id, uint256 value);
        event TransferBatch(address indexed operator, address indexed from, address indexed to, uint256[] ids, uint256[] values);
        event L1FertilizerMigrated(address indexed owner, address indexed receiver, uint256[] fertIds, uint128[] amounts, uint128 lastBpf);
    }
}

/// Plain ERC-20 events, mostly useful as context around protocol events.
pub mod erc20 {
    alloy::sol! {
        #![sol(all_derives)]

        event Transfer(address indexed from, address indexed to, uint256 value);
    }
}

/// A logical set of events watched together, usually everything one contract emits that the
/// alerts care about.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventGroup {
    Beanstalk,
    Season,
    Market,
    Well,
    BarnRaise,
    Erc20,
}

/// How to turn raw log data into an [`EventKind`].
pub type DecodeFn = fn(&LogData) -> sol_types::Result<EventKind>;

/// One registrable event: its group, canonical signature and decoder.
#[derive(Copy, Clone, Debug)]
pub struct EventDefinition {
    pub group: EventGroup,
    pub signature: &'static str,
    pub decode: DecodeFn,
}

fn decode_into<E: SolEvent + Into<EventKind>>(data: &LogData) -> sol_types::Result<EventKind> {
    E::decode_log_data(data).map(Into::into)
}

macro_rules! event_kinds {
    ($($group:ident => $module:ident { $($event:ident),+ $(,)? })+) => {
        /// Every event the pipeline knows how to decode.
        #[derive(Clone, Debug, PartialEq, Eq)]
        pub enum EventKind {
            $($($event($module::$event),)+)+
        }

        impl EventKind {
            /// Event name as written in the Solidity signature.
            #[must_use]
            pub fn name(&self) -> &'static str {
                match self {
                    $($(Self::$event(_) => stringify!($event),)+)+
                }
            }
        }

        $($(
            impl From<$module::$event> for EventKind {
                fn from(event: $module::$event) -> Self {
                    Self::$event(event)
                }
            }
        )+)+

        impl EventGroup {
            /// Every group, in declaration order.
            pub const ALL: &'static [EventGroup] = &[$(EventGroup::$group),+];

            /// The events of this group, in declaration order.
            #[must_use]
            pub fn definitions(self) -> Vec<EventDefinition> {
                match self {
                    $(EventGroup::$group => vec![
                        $(EventDefinition {
                            group: self,
                            signature: <$module::$event as SolEvent>::SIGNATURE,
                            decode: decode_into::<$module::$event>,
                        },)+
                    ],)+
                }
            }
        }
    };
}

event_kinds! {
    Beanstalk => beanstalk {
        Sow, Harvest, AddDeposit, RemoveDeposit, RemoveDeposits, Convert, ConvertDownPenalty,
        CancelBlueprint, TractorExecutionBegan, Tractor, Chop, Plant, Pick, ClaimFertilizer,
        L1DepositsMigrated,
    }
    Season => season { Sunrise, SeasonOfPlentyWell, SeasonOfPlentyField }
    Market => market {
        PodListingCreated, PodListingFilled, PodListingCancelled, PodOrderCreated, PodOrderFilled,
        PodOrderCancelled,
    }
    Well => well { Swap, AddLiquidity, RemoveLiquidity, RemoveLiquidityOneToken, Shift }
    BarnRaise => fertilizer { TransferSingle, TransferBatch, L1FertilizerMigrated }
    Erc20 => erc20 { Transfer }
}

/// Which end of an execution context a marker event delimits.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MarkerSide {
    Begin,
    End,
}

impl std::fmt::Display for MarkerSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarkerSide::Begin => f.write_str("begin"),
            MarkerSide::End => f.write_str("end"),
        }
    }
}

/// A begin or end marker extracted from a decoded event.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Marker {
    pub side: MarkerSide,
    pub key: CorrelationKey,
    pub operator: Address,
    pub publisher: Address,
}

impl EventKind {
    /// `TractorExecutionBegan` opens a blueprint execution and `Tractor` closes it; both carry the
    /// blueprint hash and nonce that pair them.
    #[must_use]
    pub fn marker(&self) -> Option<Marker> {
        let (side, operator, publisher, blueprint_hash, nonce) = match self {
            Self::TractorExecutionBegan(e) => {
                (MarkerSide::Begin, e.operator, e.publisher, e.blueprintHash, e.nonce)
            }
            Self::Tractor(e) => (MarkerSide::End, e.operator, e.publisher, e.blueprintHash, e.nonce),
            _ => return None,
        };
        Some(Marker { side, key: CorrelationKey { blueprint_hash, nonce }, operator, publisher })
    }
}
