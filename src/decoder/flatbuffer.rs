//! Flatbuffers encoding of flag configuration.
//!
//! Table accessors follow the layout of `flatc`-generated code for `schema/flag_config.fbs`.
//! The buffer is verified once when the source is created; later reads skip verification.
use std::{collections::HashMap, sync::Arc};

use chrono::DateTime;
use flatbuffers::{
    FlatBufferBuilder, Follow, ForwardsUOffset, InvalidFlatbuffer, Table, VOffsetT, Vector,
    Verifiable, Verifier, WIPOffset,
};

use super::{DecodeError, FlagSource};
use crate::{
    ufc::{
        Allocation, Condition, ConditionOperator, ConditionValue, Flag, Rule, Shard, ShardRange,
        Split, Timestamp, Value, Variation, VariationType,
    },
    Str,
};

const VALUE_KIND_BOOLEAN: u8 = 1;
const VALUE_KIND_NUMBER: u8 = 2;
const VALUE_KIND_STRING: u8 = 3;

type TableVector<'a, T> = Vector<'a, ForwardsUOffset<T>>;

macro_rules! table {
    ($name:ident) => {
        #[derive(Copy, Clone, PartialEq)]
        pub struct $name<'a> {
            _tab: Table<'a>,
        }

        impl<'a> Follow<'a> for $name<'a> {
            type Inner = $name<'a>;

            #[inline]
            unsafe fn follow(buf: &'a [u8], loc: usize) -> Self::Inner {
                Self {
                    _tab: Table::new(buf, loc),
                }
            }
        }
    };
}

table!(FlagConfigTable);
table!(FlagTable);
table!(VariationTable);
table!(ValueTable);
table!(AllocationTable);
table!(RuleTable);
table!(ConditionTable);
table!(ConditionValueTable);
table!(SplitTable);
table!(ShardTable);
table!(ShardRangeTable);
table!(KeyValueTable);

impl<'a> FlagConfigTable<'a> {
    pub const VT_CREATED_AT_MS: VOffsetT = 4;
    pub const VT_ENVIRONMENT: VOffsetT = 6;
    pub const VT_FLAGS: VOffsetT = 8;

    pub fn created_at_ms(&self) -> Option<i64> {
        unsafe { self._tab.get::<i64>(Self::VT_CREATED_AT_MS, None) }
    }

    pub fn environment(&self) -> Option<&'a str> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<&str>>(Self::VT_ENVIRONMENT, None)
        }
    }

    pub fn flags(&self) -> Option<TableVector<'a, FlagTable<'a>>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<TableVector<'a, FlagTable<'a>>>>(Self::VT_FLAGS, None)
        }
    }
}

impl Verifiable for FlagConfigTable<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<i64>("created_at_ms", Self::VT_CREATED_AT_MS, false)?
            .visit_field::<ForwardsUOffset<&str>>("environment", Self::VT_ENVIRONMENT, false)?
            .visit_field::<ForwardsUOffset<TableVector<'_, FlagTable>>>(
                "flags",
                Self::VT_FLAGS,
                false,
            )?
            .finish();
        Ok(())
    }
}

impl<'a> FlagTable<'a> {
    pub const VT_KEY: VOffsetT = 4;
    pub const VT_ENABLED: VOffsetT = 6;
    pub const VT_VARIATION_TYPE: VOffsetT = 8;
    pub const VT_VARIATIONS: VOffsetT = 10;
    pub const VT_ALLOCATIONS: VOffsetT = 12;
    pub const VT_TOTAL_SHARDS: VOffsetT = 14;
    pub const VT_ENTITY_ID: VOffsetT = 16;

    pub fn key(&self) -> Option<&'a str> {
        unsafe { self._tab.get::<ForwardsUOffset<&str>>(Self::VT_KEY, None) }
    }

    pub fn enabled(&self) -> bool {
        unsafe { self._tab.get::<bool>(Self::VT_ENABLED, Some(false)) }.unwrap_or(false)
    }

    pub fn variation_type(&self) -> u8 {
        unsafe { self._tab.get::<u8>(Self::VT_VARIATION_TYPE, Some(0)) }.unwrap_or(0)
    }

    pub fn variations(&self) -> Option<TableVector<'a, VariationTable<'a>>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<TableVector<'a, VariationTable<'a>>>>(
                    Self::VT_VARIATIONS,
                    None,
                )
        }
    }

    pub fn allocations(&self) -> Option<TableVector<'a, AllocationTable<'a>>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<TableVector<'a, AllocationTable<'a>>>>(
                    Self::VT_ALLOCATIONS,
                    None,
                )
        }
    }

    pub fn total_shards(&self) -> u32 {
        unsafe { self._tab.get::<u32>(Self::VT_TOTAL_SHARDS, Some(0)) }.unwrap_or(0)
    }

    pub fn entity_id(&self) -> Option<i64> {
        unsafe { self._tab.get::<i64>(Self::VT_ENTITY_ID, None) }
    }
}

impl Verifiable for FlagTable<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<&str>>("key", Self::VT_KEY, true)?
            .visit_field::<bool>("enabled", Self::VT_ENABLED, false)?
            .visit_field::<u8>("variation_type", Self::VT_VARIATION_TYPE, false)?
            .visit_field::<ForwardsUOffset<TableVector<'_, VariationTable>>>(
                "variations",
                Self::VT_VARIATIONS,
                false,
            )?
            .visit_field::<ForwardsUOffset<TableVector<'_, AllocationTable>>>(
                "allocations",
                Self::VT_ALLOCATIONS,
                false,
            )?
            .visit_field::<u32>("total_shards", Self::VT_TOTAL_SHARDS, false)?
            .visit_field::<i64>("entity_id", Self::VT_ENTITY_ID, false)?
            .finish();
        Ok(())
    }
}

impl<'a> VariationTable<'a> {
    pub const VT_KEY: VOffsetT = 4;
    pub const VT_VALUE: VOffsetT = 6;

    pub fn key(&self) -> Option<&'a str> {
        unsafe { self._tab.get::<ForwardsUOffset<&str>>(Self::VT_KEY, None) }
    }

    pub fn value(&self) -> Option<ValueTable<'a>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<ValueTable<'a>>>(Self::VT_VALUE, None)
        }
    }
}

impl Verifiable for VariationTable<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<&str>>("key", Self::VT_KEY, false)?
            .visit_field::<ForwardsUOffset<ValueTable>>("value", Self::VT_VALUE, false)?
            .finish();
        Ok(())
    }
}

impl<'a> ValueTable<'a> {
    pub const VT_KIND: VOffsetT = 4;
    pub const VT_BOOL_VALUE: VOffsetT = 6;
    pub const VT_NUMBER_VALUE: VOffsetT = 8;
    pub const VT_STRING_VALUE: VOffsetT = 10;

    pub fn kind(&self) -> u8 {
        unsafe { self._tab.get::<u8>(Self::VT_KIND, Some(0)) }.unwrap_or(0)
    }

    pub fn bool_value(&self) -> bool {
        unsafe { self._tab.get::<bool>(Self::VT_BOOL_VALUE, Some(false)) }.unwrap_or(false)
    }

    pub fn number_value(&self) -> f64 {
        unsafe { self._tab.get::<f64>(Self::VT_NUMBER_VALUE, Some(0.0)) }.unwrap_or(0.0)
    }

    pub fn string_value(&self) -> Option<&'a str> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<&str>>(Self::VT_STRING_VALUE, None)
        }
    }
}

impl Verifiable for ValueTable<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<u8>("kind", Self::VT_KIND, false)?
            .visit_field::<bool>("bool_value", Self::VT_BOOL_VALUE, false)?
            .visit_field::<f64>("number_value", Self::VT_NUMBER_VALUE, false)?
            .visit_field::<ForwardsUOffset<&str>>("string_value", Self::VT_STRING_VALUE, false)?
            .finish();
        Ok(())
    }
}

impl<'a> AllocationTable<'a> {
    pub const VT_KEY: VOffsetT = 4;
    pub const VT_RULES: VOffsetT = 6;
    pub const VT_START_AT_MS: VOffsetT = 8;
    pub const VT_END_AT_MS: VOffsetT = 10;
    pub const VT_SPLITS: VOffsetT = 12;
    pub const VT_DO_LOG: VOffsetT = 14;

    pub fn key(&self) -> Option<&'a str> {
        unsafe { self._tab.get::<ForwardsUOffset<&str>>(Self::VT_KEY, None) }
    }

    pub fn rules(&self) -> Option<TableVector<'a, RuleTable<'a>>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<TableVector<'a, RuleTable<'a>>>>(Self::VT_RULES, None)
        }
    }

    pub fn start_at_ms(&self) -> Option<i64> {
        unsafe { self._tab.get::<i64>(Self::VT_START_AT_MS, None) }
    }

    pub fn end_at_ms(&self) -> Option<i64> {
        unsafe { self._tab.get::<i64>(Self::VT_END_AT_MS, None) }
    }

    pub fn splits(&self) -> Option<TableVector<'a, SplitTable<'a>>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<TableVector<'a, SplitTable<'a>>>>(Self::VT_SPLITS, None)
        }
    }

    pub fn do_log(&self) -> bool {
        unsafe { self._tab.get::<bool>(Self::VT_DO_LOG, Some(true)) }.unwrap_or(true)
    }
}

impl Verifiable for AllocationTable<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<&str>>("key", Self::VT_KEY, false)?
            .visit_field::<ForwardsUOffset<TableVector<'_, RuleTable>>>(
                "rules",
                Self::VT_RULES,
                false,
            )?
            .visit_field::<i64>("start_at_ms", Self::VT_START_AT_MS, false)?
            .visit_field::<i64>("end_at_ms", Self::VT_END_AT_MS, false)?
            .visit_field::<ForwardsUOffset<TableVector<'_, SplitTable>>>(
                "splits",
                Self::VT_SPLITS,
                false,
            )?
            .visit_field::<bool>("do_log", Self::VT_DO_LOG, false)?
            .finish();
        Ok(())
    }
}

impl<'a> RuleTable<'a> {
    pub const VT_CONDITIONS: VOffsetT = 4;

    pub fn conditions(&self) -> Option<TableVector<'a, ConditionTable<'a>>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<TableVector<'a, ConditionTable<'a>>>>(
                    Self::VT_CONDITIONS,
                    None,
                )
        }
    }
}

impl Verifiable for RuleTable<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<TableVector<'_, ConditionTable>>>(
                "conditions",
                Self::VT_CONDITIONS,
                false,
            )?
            .finish();
        Ok(())
    }
}

impl<'a> ConditionTable<'a> {
    pub const VT_ATTRIBUTE: VOffsetT = 4;
    pub const VT_OPERATOR: VOffsetT = 6;
    pub const VT_VALUE: VOffsetT = 8;

    pub fn attribute(&self) -> Option<&'a str> {
        unsafe { self._tab.get::<ForwardsUOffset<&str>>(Self::VT_ATTRIBUTE, None) }
    }

    pub fn operator(&self) -> u8 {
        unsafe { self._tab.get::<u8>(Self::VT_OPERATOR, Some(0)) }.unwrap_or(0)
    }

    pub fn value(&self) -> Option<ConditionValueTable<'a>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<ConditionValueTable<'a>>>(Self::VT_VALUE, None)
        }
    }
}

impl Verifiable for ConditionTable<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<&str>>("attribute", Self::VT_ATTRIBUTE, false)?
            .visit_field::<u8>("operator", Self::VT_OPERATOR, false)?
            .visit_field::<ForwardsUOffset<ConditionValueTable>>("value", Self::VT_VALUE, false)?
            .finish();
        Ok(())
    }
}

impl<'a> ConditionValueTable<'a> {
    pub const VT_SINGLE: VOffsetT = 4;
    pub const VT_MULTIPLE: VOffsetT = 6;

    pub fn single(&self) -> Option<ValueTable<'a>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<ValueTable<'a>>>(Self::VT_SINGLE, None)
        }
    }

    pub fn multiple(&self) -> Option<Vector<'a, ForwardsUOffset<&'a str>>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<Vector<'a, ForwardsUOffset<&'a str>>>>(
                    Self::VT_MULTIPLE,
                    None,
                )
        }
    }
}

impl Verifiable for ConditionValueTable<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<ValueTable>>("single", Self::VT_SINGLE, false)?
            .visit_field::<ForwardsUOffset<Vector<'_, ForwardsUOffset<&str>>>>(
                "multiple",
                Self::VT_MULTIPLE,
                false,
            )?
            .finish();
        Ok(())
    }
}

impl<'a> SplitTable<'a> {
    pub const VT_VARIATION_KEY: VOffsetT = 4;
    pub const VT_SHARDS: VOffsetT = 6;
    pub const VT_EXTRA_LOGGING: VOffsetT = 8;

    pub fn variation_key(&self) -> Option<&'a str> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<&str>>(Self::VT_VARIATION_KEY, None)
        }
    }

    pub fn shards(&self) -> Option<TableVector<'a, ShardTable<'a>>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<TableVector<'a, ShardTable<'a>>>>(Self::VT_SHARDS, None)
        }
    }

    pub fn extra_logging(&self) -> Option<TableVector<'a, KeyValueTable<'a>>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<TableVector<'a, KeyValueTable<'a>>>>(
                    Self::VT_EXTRA_LOGGING,
                    None,
                )
        }
    }
}

impl Verifiable for SplitTable<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<&str>>("variation_key", Self::VT_VARIATION_KEY, false)?
            .visit_field::<ForwardsUOffset<TableVector<'_, ShardTable>>>(
                "shards",
                Self::VT_SHARDS,
                false,
            )?
            .visit_field::<ForwardsUOffset<TableVector<'_, KeyValueTable>>>(
                "extra_logging",
                Self::VT_EXTRA_LOGGING,
                false,
            )?
            .finish();
        Ok(())
    }
}

impl<'a> ShardTable<'a> {
    pub const VT_SALT: VOffsetT = 4;
    pub const VT_RANGES: VOffsetT = 6;

    pub fn salt(&self) -> Option<&'a str> {
        unsafe { self._tab.get::<ForwardsUOffset<&str>>(Self::VT_SALT, None) }
    }

    pub fn ranges(&self) -> Option<TableVector<'a, ShardRangeTable<'a>>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<TableVector<'a, ShardRangeTable<'a>>>>(
                    Self::VT_RANGES,
                    None,
                )
        }
    }
}

impl Verifiable for ShardTable<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<&str>>("salt", Self::VT_SALT, false)?
            .visit_field::<ForwardsUOffset<TableVector<'_, ShardRangeTable>>>(
                "ranges",
                Self::VT_RANGES,
                false,
            )?
            .finish();
        Ok(())
    }
}

impl ShardRangeTable<'_> {
    pub const VT_START: VOffsetT = 4;
    pub const VT_END: VOffsetT = 6;

    pub fn start(&self) -> u32 {
        unsafe { self._tab.get::<u32>(Self::VT_START, Some(0)) }.unwrap_or(0)
    }

    pub fn end(&self) -> u32 {
        unsafe { self._tab.get::<u32>(Self::VT_END, Some(0)) }.unwrap_or(0)
    }
}

impl Verifiable for ShardRangeTable<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<u32>("start", Self::VT_START, false)?
            .visit_field::<u32>("end", Self::VT_END, false)?
            .finish();
        Ok(())
    }
}

impl<'a> KeyValueTable<'a> {
    pub const VT_KEY: VOffsetT = 4;
    pub const VT_VALUE: VOffsetT = 6;

    pub fn key(&self) -> Option<&'a str> {
        unsafe { self._tab.get::<ForwardsUOffset<&str>>(Self::VT_KEY, None) }
    }

    pub fn value(&self) -> Option<&'a str> {
        unsafe { self._tab.get::<ForwardsUOffset<&str>>(Self::VT_VALUE, None) }
    }
}

impl Verifiable for KeyValueTable<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<&str>>("key", Self::VT_KEY, false)?
            .visit_field::<ForwardsUOffset<&str>>("value", Self::VT_VALUE, false)?
            .finish();
        Ok(())
    }
}

/// Flatbuffer-encoded configuration. Flags are read straight from the buffer on demand.
pub struct FlatbufferFlagSource {
    bytes: Arc<[u8]>,
    created_at: Option<Timestamp>,
    environment: Option<Str>,
    index: HashMap<Str, usize>,
}

impl FlatbufferFlagSource {
    pub(crate) fn from_bytes(bytes: Arc<[u8]>) -> Result<FlatbufferFlagSource, DecodeError> {
        let root = flatbuffers::root::<FlagConfigTable>(&bytes)
            .map_err(|err| DecodeError::InvalidFlatbuffer(err.to_string()))?;

        let created_at = root.created_at_ms().map(timestamp_from_ms).transpose()?;
        let environment = root.environment().map(Str::from);

        let mut index = HashMap::new();
        for (i, flag) in root.flags().into_iter().flatten().enumerate() {
            // `key` is a required field, so verification guarantees it's present.
            if let Some(key) = flag.key() {
                index.insert(Str::from(key), i);
            }
        }

        Ok(FlatbufferFlagSource {
            bytes,
            created_at,
            environment,
            index,
        })
    }

    fn root(&self) -> FlagConfigTable<'_> {
        // SAFETY: the buffer was verified in `from_bytes` and is immutable afterwards.
        unsafe { flatbuffers::root_unchecked::<FlagConfigTable>(&self.bytes) }
    }
}

impl std::fmt::Debug for FlatbufferFlagSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlatbufferFlagSource")
            .field("len", &self.bytes.len())
            .field("flag_count", &self.index.len())
            .finish_non_exhaustive()
    }
}

impl FlagSource for FlatbufferFlagSource {
    fn flag_count(&self) -> usize {
        self.index.len()
    }

    fn flag_keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.index.keys().map(|key| key.as_str())
    }

    fn decode_flag(&self, key: &str) -> Option<Result<Flag, DecodeError>> {
        let position = *self.index.get(key)?;
        let flag = self.root().flags()?.get(position);
        Some(decode_flag(flag))
    }

    fn created_at(&self) -> Option<Timestamp> {
        self.created_at
    }

    fn environment(&self) -> Option<&str> {
        self.environment.as_ref().map(|env| env.as_str())
    }
}

fn timestamp_from_ms(ms: i64) -> Result<Timestamp, DecodeError> {
    DateTime::from_timestamp_millis(ms).ok_or(DecodeError::InvalidTimestamp(ms))
}

fn decode_flag(flag: FlagTable) -> Result<Flag, DecodeError> {
    let variation_type = VariationType::from_wire_id(i32::from(flag.variation_type()))
        .ok_or(DecodeError::UnknownVariationType(i32::from(
            flag.variation_type(),
        )))?;

    let variations = flag
        .variations()
        .into_iter()
        .flatten()
        .map(|variation| {
            let key = Str::from(
                variation
                    .key()
                    .ok_or(DecodeError::MissingField("variation.key"))?,
            );
            let value = decode_value(
                variation
                    .value()
                    .ok_or(DecodeError::MissingField("variation.value"))?,
            )?;
            Ok((key.clone(), Variation { key, value }))
        })
        .collect::<Result<_, DecodeError>>()?;

    let allocations = flag
        .allocations()
        .into_iter()
        .flatten()
        .map(decode_allocation)
        .collect::<Result<_, _>>()?;

    Ok(Flag {
        key: flag
            .key()
            .ok_or(DecodeError::MissingField("flag.key"))?
            .into(),
        enabled: flag.enabled(),
        variation_type,
        variations,
        allocations,
        total_shards: flag.total_shards(),
        entity_id: flag.entity_id(),
    })
}

fn decode_value(value: ValueTable) -> Result<Value, DecodeError> {
    Ok(match value.kind() {
        VALUE_KIND_BOOLEAN => Value::Boolean(value.bool_value()),
        VALUE_KIND_NUMBER => Value::Number(value.number_value()),
        VALUE_KIND_STRING => Value::String(
            value
                .string_value()
                .ok_or(DecodeError::MissingField("value.string_value"))?
                .into(),
        ),
        _ => return Err(DecodeError::MissingField("value.kind")),
    })
}

fn decode_allocation(allocation: AllocationTable) -> Result<Allocation, DecodeError> {
    let rules = allocation
        .rules()
        .into_iter()
        .flatten()
        .map(|rule| {
            let conditions = rule
                .conditions()
                .into_iter()
                .flatten()
                .map(decode_condition)
                .collect::<Result<_, _>>()?;
            Ok(Rule { conditions })
        })
        .collect::<Result<_, DecodeError>>()?;

    let splits = allocation
        .splits()
        .into_iter()
        .flatten()
        .map(decode_split)
        .collect::<Result<_, _>>()?;

    Ok(Allocation {
        key: allocation
            .key()
            .ok_or(DecodeError::MissingField("allocation.key"))?
            .into(),
        rules,
        start_at: allocation.start_at_ms().map(timestamp_from_ms).transpose()?,
        end_at: allocation.end_at_ms().map(timestamp_from_ms).transpose()?,
        splits,
        do_log: allocation.do_log(),
    })
}

fn decode_condition(condition: ConditionTable) -> Result<Condition, DecodeError> {
    let value = condition
        .value()
        .ok_or(DecodeError::MissingField("condition.value"))?;
    let value = match (value.single(), value.multiple()) {
        (Some(single), _) => ConditionValue::Single(decode_value(single)?),
        (None, Some(multiple)) => {
            ConditionValue::Multiple(multiple.iter().map(str::to_owned).collect())
        }
        (None, None) => return Err(DecodeError::MissingField("condition.value")),
    };

    Ok(Condition {
        attribute: condition
            .attribute()
            .ok_or(DecodeError::MissingField("condition.attribute"))?
            .to_owned(),
        operator: ConditionOperator::from_wire_id(i32::from(condition.operator())),
        value,
    })
}

fn decode_split(split: SplitTable) -> Result<Split, DecodeError> {
    let shards = split
        .shards()
        .into_iter()
        .flatten()
        .map(|shard| {
            Ok(Shard {
                salt: shard
                    .salt()
                    .ok_or(DecodeError::MissingField("shard.salt"))?
                    .to_owned(),
                ranges: shard
                    .ranges()
                    .into_iter()
                    .flatten()
                    .map(|range| ShardRange {
                        start: range.start(),
                        end: range.end(),
                    })
                    .collect(),
            })
        })
        .collect::<Result<_, DecodeError>>()?;

    let extra_logging = split
        .extra_logging()
        .into_iter()
        .flatten()
        .filter_map(|kv| Some((kv.key()?.to_owned(), kv.value()?.to_owned())))
        .collect();

    Ok(Split {
        variation_key: split
            .variation_key()
            .ok_or(DecodeError::MissingField("split.variation_key"))?
            .into(),
        shards,
        extra_logging,
    })
}

/// Encode flags as a flatbuffer configuration.
pub fn encode_flatbuffer(
    created_at: Option<Timestamp>,
    environment: Option<&str>,
    flags: &[Flag],
) -> Vec<u8> {
    let mut fbb = FlatBufferBuilder::new();

    let flags: Vec<_> = flags.iter().map(|flag| build_flag(&mut fbb, flag)).collect();
    let flags = fbb.create_vector(&flags);
    let environment = environment.map(|env| fbb.create_string(env));

    let start = fbb.start_table();
    if let Some(created_at) = created_at {
        fbb.push_slot_always::<i64>(
            FlagConfigTable::VT_CREATED_AT_MS,
            created_at.timestamp_millis(),
        );
    }
    if let Some(environment) = environment {
        fbb.push_slot_always(FlagConfigTable::VT_ENVIRONMENT, environment);
    }
    fbb.push_slot_always(FlagConfigTable::VT_FLAGS, flags);
    let root = fbb.end_table(start);
    let root: WIPOffset<FlagConfigTable> = WIPOffset::new(root.value());

    fbb.finish(root, None);
    fbb.finished_data().to_vec()
}

fn build_flag<'fbb>(fbb: &mut FlatBufferBuilder<'fbb>, flag: &Flag) -> WIPOffset<FlagTable<'fbb>> {
    let key = fbb.create_string(&flag.key);
    let variations: Vec<_> = flag
        .variations
        .values()
        .map(|variation| {
            let key = fbb.create_string(&variation.key);
            let value = build_value(fbb, &variation.value);
            let start = fbb.start_table();
            fbb.push_slot_always(VariationTable::VT_KEY, key);
            fbb.push_slot_always(VariationTable::VT_VALUE, value);
            let o = fbb.end_table(start);
            WIPOffset::<VariationTable>::new(o.value())
        })
        .collect();
    let variations = fbb.create_vector(&variations);
    let allocations: Vec<_> = flag
        .allocations
        .iter()
        .map(|allocation| build_allocation(fbb, allocation))
        .collect();
    let allocations = fbb.create_vector(&allocations);

    let start = fbb.start_table();
    fbb.push_slot_always(FlagTable::VT_KEY, key);
    fbb.push_slot::<bool>(FlagTable::VT_ENABLED, flag.enabled, false);
    // Variation type ids are small positive numbers, so they always fit into a byte.
    fbb.push_slot::<u8>(
        FlagTable::VT_VARIATION_TYPE,
        flag.variation_type.wire_id() as u8,
        0,
    );
    fbb.push_slot_always(FlagTable::VT_VARIATIONS, variations);
    fbb.push_slot_always(FlagTable::VT_ALLOCATIONS, allocations);
    fbb.push_slot::<u32>(FlagTable::VT_TOTAL_SHARDS, flag.total_shards, 0);
    if let Some(entity_id) = flag.entity_id {
        fbb.push_slot_always::<i64>(FlagTable::VT_ENTITY_ID, entity_id);
    }
    let o = fbb.end_table(start);
    WIPOffset::new(o.value())
}

fn build_value<'fbb>(
    fbb: &mut FlatBufferBuilder<'fbb>,
    value: &Value,
) -> WIPOffset<ValueTable<'fbb>> {
    let string_value = match value {
        Value::String(s) => Some(fbb.create_string(s)),
        _ => None,
    };

    let start = fbb.start_table();
    match value {
        Value::Boolean(b) => {
            fbb.push_slot_always::<u8>(ValueTable::VT_KIND, VALUE_KIND_BOOLEAN);
            fbb.push_slot_always::<bool>(ValueTable::VT_BOOL_VALUE, *b);
        }
        Value::Number(n) => {
            fbb.push_slot_always::<u8>(ValueTable::VT_KIND, VALUE_KIND_NUMBER);
            fbb.push_slot_always::<f64>(ValueTable::VT_NUMBER_VALUE, *n);
        }
        Value::String(_) => {
            fbb.push_slot_always::<u8>(ValueTable::VT_KIND, VALUE_KIND_STRING);
        }
    }
    if let Some(string_value) = string_value {
        fbb.push_slot_always(ValueTable::VT_STRING_VALUE, string_value);
    }
    let o = fbb.end_table(start);
    WIPOffset::new(o.value())
}

fn build_allocation<'fbb>(
    fbb: &mut FlatBufferBuilder<'fbb>,
    allocation: &Allocation,
) -> WIPOffset<AllocationTable<'fbb>> {
    let key = fbb.create_string(&allocation.key);
    let rules: Vec<_> = allocation
        .rules
        .iter()
        .map(|rule| {
            let conditions: Vec<_> = rule
                .conditions
                .iter()
                .map(|condition| build_condition(fbb, condition))
                .collect();
            let conditions = fbb.create_vector(&conditions);
            let start = fbb.start_table();
            fbb.push_slot_always(RuleTable::VT_CONDITIONS, conditions);
            let o = fbb.end_table(start);
            WIPOffset::<RuleTable>::new(o.value())
        })
        .collect();
    let rules = fbb.create_vector(&rules);
    let splits: Vec<_> = allocation
        .splits
        .iter()
        .map(|split| build_split(fbb, split))
        .collect();
    let splits = fbb.create_vector(&splits);

    let start = fbb.start_table();
    fbb.push_slot_always(AllocationTable::VT_KEY, key);
    fbb.push_slot_always(AllocationTable::VT_RULES, rules);
    if let Some(start_at) = allocation.start_at {
        fbb.push_slot_always::<i64>(AllocationTable::VT_START_AT_MS, start_at.timestamp_millis());
    }
    if let Some(end_at) = allocation.end_at {
        fbb.push_slot_always::<i64>(AllocationTable::VT_END_AT_MS, end_at.timestamp_millis());
    }
    fbb.push_slot_always(AllocationTable::VT_SPLITS, splits);
    fbb.push_slot::<bool>(AllocationTable::VT_DO_LOG, allocation.do_log, true);
    let o = fbb.end_table(start);
    WIPOffset::new(o.value())
}

fn build_condition<'fbb>(
    fbb: &mut FlatBufferBuilder<'fbb>,
    condition: &Condition,
) -> WIPOffset<ConditionTable<'fbb>> {
    let attribute = fbb.create_string(&condition.attribute);

    let value = match &condition.value {
        ConditionValue::Single(value) => {
            let single = build_value(fbb, value);
            let start = fbb.start_table();
            fbb.push_slot_always(ConditionValueTable::VT_SINGLE, single);
            fbb.end_table(start)
        }
        ConditionValue::Multiple(values) => {
            let values: Vec<_> = values.iter().map(|v| fbb.create_string(v)).collect();
            let multiple = fbb.create_vector(&values);
            let start = fbb.start_table();
            fbb.push_slot_always(ConditionValueTable::VT_MULTIPLE, multiple);
            fbb.end_table(start)
        }
    };
    let value: WIPOffset<ConditionValueTable> = WIPOffset::new(value.value());

    let start = fbb.start_table();
    fbb.push_slot_always(ConditionTable::VT_ATTRIBUTE, attribute);
    // Operator ids fit into a byte; `Unrecognized` is written as 0 and read back as such.
    fbb.push_slot::<u8>(
        ConditionTable::VT_OPERATOR,
        condition.operator.wire_id() as u8,
        0,
    );
    fbb.push_slot_always(ConditionTable::VT_VALUE, value);
    let o = fbb.end_table(start);
    WIPOffset::new(o.value())
}

fn build_split<'fbb>(
    fbb: &mut FlatBufferBuilder<'fbb>,
    split: &Split,
) -> WIPOffset<SplitTable<'fbb>> {
    let variation_key = fbb.create_string(&split.variation_key);
    let shards: Vec<_> = split
        .shards
        .iter()
        .map(|shard| {
            let salt = fbb.create_string(&shard.salt);
            let ranges: Vec<_> = shard
                .ranges
                .iter()
                .map(|range| {
                    let start = fbb.start_table();
                    fbb.push_slot::<u32>(ShardRangeTable::VT_START, range.start, 0);
                    fbb.push_slot::<u32>(ShardRangeTable::VT_END, range.end, 0);
                    let o = fbb.end_table(start);
                    WIPOffset::<ShardRangeTable>::new(o.value())
                })
                .collect();
            let ranges = fbb.create_vector(&ranges);
            let start = fbb.start_table();
            fbb.push_slot_always(ShardTable::VT_SALT, salt);
            fbb.push_slot_always(ShardTable::VT_RANGES, ranges);
            let o = fbb.end_table(start);
            WIPOffset::<ShardTable>::new(o.value())
        })
        .collect();
    let shards = fbb.create_vector(&shards);
    let extra_logging: Vec<_> = split
        .extra_logging
        .iter()
        .map(|(key, value)| {
            let key = fbb.create_string(key);
            let value = fbb.create_string(value);
            let start = fbb.start_table();
            fbb.push_slot_always(KeyValueTable::VT_KEY, key);
            fbb.push_slot_always(KeyValueTable::VT_VALUE, value);
            let o = fbb.end_table(start);
            WIPOffset::<KeyValueTable>::new(o.value())
        })
        .collect();
    let extra_logging = fbb.create_vector(&extra_logging);

    let start = fbb.start_table();
    fbb.push_slot_always(SplitTable::VT_VARIATION_KEY, variation_key);
    fbb.push_slot_always(SplitTable::VT_SHARDS, shards);
    fbb.push_slot_always(SplitTable::VT_EXTRA_LOGGING, extra_logging);
    let o = fbb.end_table(start);
    WIPOffset::new(o.value())
}
