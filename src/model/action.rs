//! Executable content and the definitions that hang off states.
//!
//! These are plain data: the executor interprets them, the [`Evaluator`]
//! resolves every expression string they carry.
//!
//! [`Evaluator`]: crate::evaluator::Evaluator

use std::collections::BTreeMap;

use serde_json::Value;

/// One element of executable content.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Assign {
        location: String,
        expr: Option<String>,
        content: Option<Value>,
    },
    Raise {
        event: String,
    },
    Send(Box<SendDef>),
    Cancel {
        send_id: Option<String>,
        send_id_expr: Option<String>,
    },
    Log {
        label: Option<String>,
        expr: Option<String>,
    },
    /// `<if>` / `<elseif>` chain; `otherwise` is the `<else>` branch.
    If {
        branches: Vec<ConditionalBlock>,
        otherwise: Vec<Action>,
    },
    Foreach {
        array: String,
        item: String,
        index: Option<String>,
        actions: Vec<Action>,
    },
    Script {
        source: String,
    },
    Custom(CustomActionCall),
}

impl Action {
    pub fn assign(location: impl Into<String>, expr: impl Into<String>) -> Self {
        Action::Assign {
            location: location.into(),
            expr: Some(expr.into()),
            content: None,
        }
    }

    pub fn raise(event: impl Into<String>) -> Self {
        Action::Raise {
            event: event.into(),
        }
    }

    pub fn send(def: SendDef) -> Self {
        Action::Send(Box::new(def))
    }

    pub fn cancel(send_id: impl Into<String>) -> Self {
        Action::Cancel {
            send_id: Some(send_id.into()),
            send_id_expr: None,
        }
    }

    pub fn log(label: impl Into<String>, expr: impl Into<String>) -> Self {
        Action::Log {
            label: Some(label.into()),
            expr: Some(expr.into()),
        }
    }

    pub fn script(source: impl Into<String>) -> Self {
        Action::Script {
            source: source.into(),
        }
    }

    pub fn if_then(cond: impl Into<String>, actions: Vec<Action>) -> Self {
        Action::If {
            branches: vec![ConditionalBlock {
                cond: cond.into(),
                actions,
            }],
            otherwise: Vec::new(),
        }
    }

    /// Names of custom actions referenced anywhere below this action.
    pub(crate) fn collect_custom<'a>(&'a self, out: &mut Vec<&'a CustomActionCall>) {
        match self {
            Action::Custom(call) => out.push(call),
            Action::If {
                branches,
                otherwise,
            } => {
                for branch in branches {
                    branch.actions.iter().for_each(|a| a.collect_custom(out));
                }
                otherwise.iter().for_each(|a| a.collect_custom(out));
            }
            Action::Foreach { actions, .. } => actions.iter().for_each(|a| a.collect_custom(out)),
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalBlock {
    pub cond: String,
    pub actions: Vec<Action>,
}

/// An `<onentry>` or `<onexit>` handler.
///
/// With `raise_event` set the executor raises `entry.state.<id>` /
/// `exit.state.<id>` after the actions ran.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutableBlock {
    pub actions: Vec<Action>,
    pub raise_event: bool,
}

impl ExecutableBlock {
    pub fn new(actions: Vec<Action>) -> Self {
        Self {
            actions,
            raise_event: false,
        }
    }

    pub fn raising(mut self) -> Self {
        self.raise_event = true;
        self
    }
}

impl From<Vec<Action>> for ExecutableBlock {
    fn from(actions: Vec<Action>) -> Self {
        Self::new(actions)
    }
}

/// A custom action element, dispatched through the
/// [`CustomActionRegistry`](crate::custom_action::CustomActionRegistry).
#[derive(Debug, Clone, PartialEq)]
pub struct CustomActionCall {
    pub namespace: String,
    pub local_name: String,
    pub attributes: BTreeMap<String, String>,
}

impl CustomActionCall {
    pub fn new(namespace: impl Into<String>, local_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            local_name: local_name.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub expr: Option<String>,
    pub location: Option<String>,
}

impl Param {
    pub fn expr(name: impl Into<String>, expr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expr: Some(expr.into()),
            location: None,
        }
    }

    pub fn location(name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expr: None,
            location: Some(location.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Expr(String),
    Value(Value),
}

/// Payload of a `<final>` state, surfaced as the data of `done.state.<id>`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DoneData {
    pub content: Option<Content>,
    pub params: Vec<Param>,
}

impl DoneData {
    pub fn content_expr(expr: impl Into<String>) -> Self {
        Self {
            content: Some(Content::Expr(expr.into())),
            params: Vec::new(),
        }
    }

    pub fn params(params: Vec<Param>) -> Self {
        Self {
            content: None,
            params,
        }
    }
}

/// A `<data>` declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct DataDef {
    pub id: String,
    pub expr: Option<String>,
    pub value: Option<Value>,
}

impl DataDef {
    pub fn expr(id: impl Into<String>, expr: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            expr: Some(expr.into()),
            value: None,
        }
    }

    pub fn value(id: impl Into<String>, value: Value) -> Self {
        Self {
            id: id.into(),
            expr: None,
            value: Some(value),
        }
    }
}

/// `<send>`. Every attribute has a literal and an `*_expr` form; the literal wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendDef {
    pub event: Option<String>,
    pub event_expr: Option<String>,
    pub target: Option<String>,
    pub target_expr: Option<String>,
    pub type_: Option<String>,
    pub type_expr: Option<String>,
    pub id: Option<String>,
    pub id_location: Option<String>,
    pub delay: Option<String>,
    pub delay_expr: Option<String>,
    pub namelist: Vec<String>,
    pub params: Vec<Param>,
    pub content: Option<Content>,
}

impl SendDef {
    pub fn event(name: impl Into<String>) -> Self {
        Self {
            event: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn target_expr(mut self, expr: impl Into<String>) -> Self {
        self.target_expr = Some(expr.into());
        self
    }

    pub fn type_(mut self, type_: impl Into<String>) -> Self {
        self.type_ = Some(type_.into());
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn id_location(mut self, location: impl Into<String>) -> Self {
        self.id_location = Some(location.into());
        self
    }

    pub fn delay(mut self, delay: impl Into<String>) -> Self {
        self.delay = Some(delay.into());
        self
    }

    pub fn delay_expr(mut self, expr: impl Into<String>) -> Self {
        self.delay_expr = Some(expr.into());
        self
    }

    pub fn namelist(mut self, names: &[&str]) -> Self {
        self.namelist = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn content(mut self, content: Content) -> Self {
        self.content = Some(content);
        self
    }
}

/// `<invoke>`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvokeDef {
    pub id: Option<String>,
    pub id_location: Option<String>,
    pub type_: Option<String>,
    pub type_expr: Option<String>,
    pub src: Option<String>,
    pub src_expr: Option<String>,
    pub namelist: Vec<String>,
    pub params: Vec<Param>,
    pub content: Option<Content>,
    pub autoforward: bool,
    pub finalize: Vec<Action>,
}

impl InvokeDef {
    pub fn src(src: impl Into<String>) -> Self {
        Self {
            src: Some(src.into()),
            ..Default::default()
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn id_location(mut self, location: impl Into<String>) -> Self {
        self.id_location = Some(location.into());
        self
    }

    pub fn type_(mut self, type_: impl Into<String>) -> Self {
        self.type_ = Some(type_.into());
        self
    }

    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn content(mut self, content: Content) -> Self {
        self.content = Some(content);
        self
    }

    pub fn autoforward(mut self) -> Self {
        self.autoforward = true;
        self
    }

    pub fn finalize(mut self, actions: Vec<Action>) -> Self {
        self.finalize = actions;
        self
    }
}
