use std::{fmt, sync::Arc};

use indexmap::IndexMap;

use crate::ast::Block;

#[derive(Clone)]
pub struct Value(pub Arc<ValueKind>);

impl Value {
    pub fn new(kind: ValueKind) -> Self {
        Self(Arc::new(kind))
    }

    pub fn null() -> Self {
        Self::new(ValueKind::Null)
    }

    pub fn bool(value: bool) -> Self {
        Self::new(ValueKind::Bool(value))
    }

    pub fn number(value: i64) -> Self {
        Self::new(ValueKind::Number(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new(ValueKind::Str(value.into()))
    }

    pub fn list(values: Vec<Value>) -> Self {
        Self::new(ValueKind::List(values))
    }

    pub fn function(function: FunctionValue) -> Self {
        Self::new(ValueKind::Function(function))
    }

    pub fn instance(class_name: impl Into<String>, methods: MethodTable) -> Self {
        Self::new(ValueKind::Instance(InstanceValue {
            class_name: class_name.into(),
            methods,
        }))
    }

    pub fn is_truthy(&self) -> bool {
        match &*self.0 {
            ValueKind::Null => false,
            ValueKind::Bool(b) => *b,
            ValueKind::Number(n) => *n != 0,
            ValueKind::Str(s) => !s.is_empty(),
            ValueKind::List(values) => !values.is_empty(),
            ValueKind::Function(_) | ValueKind::Instance(_) => true,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(&*self.0, ValueKind::Number(_))
    }

    pub fn as_number(&self) -> Option<i64> {
        match &*self.0 {
            ValueKind::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match &*self.0 {
            ValueKind::Null => "Null",
            ValueKind::Bool(_) => "Bool",
            ValueKind::Number(_) => "Number",
            ValueKind::Str(_) => "String",
            ValueKind::List(_) => "List",
            ValueKind::Function(_) => "Function",
            ValueKind::Instance(_) => "Instance",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            ValueKind::Null => write!(f, "null"),
            ValueKind::Bool(b) => write!(f, "{b}"),
            ValueKind::Number(n) => write!(f, "{n}"),
            ValueKind::Str(s) => write!(f, "{s}"),
            ValueKind::List(values) => {
                write!(f, "[")?;
                for (idx, value) in values.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, "]")
            }
            ValueKind::Function(fun) => write!(
                f,
                "<function {}>",
                fun.name.as_deref().unwrap_or("anonymous")
            ),
            ValueKind::Instance(instance) => {
                write!(f, "<{} instance>", instance.class_name)
            }
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            ValueKind::Str(s) => write!(f, "\"{s}\""),
            ValueKind::List(values) => f.debug_list().entries(values.iter()).finish(),
            _ => fmt::Display::fmt(self, f),
        }
    }
}

pub enum ValueKind {
    Null,
    Bool(bool),
    Number(i64),
    Str(String),
    List(Vec<Value>),
    Function(FunctionValue),
    Instance(InstanceValue),
}

pub type MethodTable = Arc<IndexMap<String, FunctionValue>>;

#[derive(Clone)]
pub struct FunctionValue {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: Arc<Block>,
}

#[derive(Clone)]
pub struct InstanceValue {
    pub class_name: String,
    pub methods: MethodTable,
}
