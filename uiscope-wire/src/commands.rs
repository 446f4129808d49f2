// Wire protocol command numbering
//
// Command Sets:
// 1 = VirtualMachine
// 2 = ReferenceType
// 3 = ClassType
// 4 = ArrayType
// 9 = ObjectReference
// 10 = StringReference
// 11 = ThreadReference
// 13 = ArrayReference
// 14 = ClassLoaderReference
// 15 = EventRequest
// 16 = StackFrame

pub mod command_sets {
    pub const VIRTUAL_MACHINE: u8 = 1;
    pub const REFERENCE_TYPE: u8 = 2;
    pub const CLASS_TYPE: u8 = 3;
    pub const ARRAY_TYPE: u8 = 4;
    pub const OBJECT_REFERENCE: u8 = 9;
    pub const STRING_REFERENCE: u8 = 10;
    pub const THREAD_REFERENCE: u8 = 11;
    pub const ARRAY_REFERENCE: u8 = 13;
    pub const CLASS_LOADER_REFERENCE: u8 = 14;
    pub const EVENT_REQUEST: u8 = 15;
    pub const STACK_FRAME: u8 = 16;
}

// VirtualMachine commands (set 1)
pub mod vm_commands {
    pub const VERSION: u8 = 1;
    pub const CLASSES_BY_SIGNATURE: u8 = 2;
    pub const ALL_THREADS: u8 = 4;
    pub const DISPOSE: u8 = 6;
    pub const SUSPEND: u8 = 8;
    pub const RESUME: u8 = 9;
    pub const CREATE_STRING: u8 = 11;
}

// ReferenceType commands (set 2)
pub mod reference_type_commands {
    pub const SIGNATURE: u8 = 1;
    pub const CLASS_LOADER: u8 = 2;
    pub const FIELDS: u8 = 4;
    pub const METHODS: u8 = 5;
}

// ClassType commands (set 3)
pub mod class_type_commands {
    pub const SUPERCLASS: u8 = 1;
    pub const SET_VALUES: u8 = 2;
    pub const INVOKE_METHOD: u8 = 3;
}

// ArrayType commands (set 4)
pub mod array_type_commands {
    pub const NEW_INSTANCE: u8 = 1;
}

// ObjectReference commands (set 9)
pub mod object_reference_commands {
    pub const REFERENCE_TYPE: u8 = 1;
    pub const GET_VALUES: u8 = 2;
    pub const INVOKE_METHOD: u8 = 6;
    pub const DISABLE_COLLECTION: u8 = 7;
    pub const ENABLE_COLLECTION: u8 = 8;
}

// StringReference commands (set 10)
pub mod string_reference_commands {
    pub const VALUE: u8 = 1;
}

// ThreadReference commands (set 11)
pub mod thread_commands {
    pub const NAME: u8 = 1;
    pub const SUSPEND: u8 = 2;
    pub const RESUME: u8 = 3;
    pub const STATUS: u8 = 4;
    pub const FRAMES: u8 = 6;
    pub const SUSPEND_COUNT: u8 = 12;
}

// ArrayReference commands (set 13)
pub mod array_reference_commands {
    pub const LENGTH: u8 = 1;
    pub const GET_VALUES: u8 = 2;
    pub const SET_VALUES: u8 = 3;
}

// ClassLoaderReference commands (set 14)
pub mod class_loader_commands {
    pub const VISIBLE_CLASSES: u8 = 1;
}

// EventRequest commands (set 15)
pub mod event_commands {
    pub const SET: u8 = 1;
    pub const CLEAR: u8 = 2;
}

// StackFrame commands (set 16)
pub mod stack_frame_commands {
    pub const GET_VALUES: u8 = 1;
}

// Event kinds
pub mod event_kinds {
    pub const SINGLE_STEP: u8 = 1;
    pub const BREAKPOINT: u8 = 2;
    pub const EXCEPTION: u8 = 4;
    pub const THREAD_START: u8 = 6;
    pub const THREAD_DEATH: u8 = 7;
    pub const CLASS_PREPARE: u8 = 8;
    pub const VM_START: u8 = 90;
    pub const VM_DEATH: u8 = 99;
}

// EventRequest modifier kinds
pub mod modifier_kinds {
    pub const COUNT: u8 = 1;
    pub const THREAD_ONLY: u8 = 3;
    pub const LOCATION_ONLY: u8 = 7;
}

// Method invocation options
pub mod invoke_options {
    /// Resume only the invoking thread while the call runs.
    pub const SINGLE_THREADED: i32 = 0x01;
    pub const NONVIRTUAL: i32 = 0x02;
}
